//! CEM Watcher — filesystem job queue worker with a mirrored script cache.

pub mod config;
pub mod context;
pub mod error;
pub mod heartbeat;
pub mod jobs;
pub mod scripts;
pub mod shutdown;
pub mod worker_loop;
