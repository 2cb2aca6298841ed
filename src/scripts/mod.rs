//! Script cache and the remote registry it mirrors.

pub mod cache;
pub mod registry;

pub use cache::{ScriptCache, SyncReport};
pub use registry::{HttpRegistry, RegistrySource, ScriptEntry};
