//! Job lifecycle: descriptors, the directory state machine, and execution.
//!
//! - `state` — Job state machine (Queued → Processing → Completed/Failed)
//! - `descriptor` — Queue file format and parameter schema
//! - `store` — Directory-backed store; renames are the only transitions
//! - `runner` — Script invocation and outcome classification

pub mod descriptor;
pub mod runner;
pub mod state;
pub mod store;

pub use descriptor::{JobDescriptor, JobParameters, Scalar};
pub use runner::{Invocation, JobRunner, Outcome};
pub use state::JobState;
pub use store::{JobStore, ProcessingHandle, QueuedJob};
