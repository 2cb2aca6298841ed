//! Error types for the watcher.

use std::path::PathBuf;

use crate::jobs::JobState;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Registry synchronization errors. Never fatal: the cache stays usable.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Registry request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Invalid registry payload from {url}: {reason}")]
    InvalidPayload { url: String, reason: String },

    #[error("Rejected unsafe registry file name: {name}")]
    UnsafeName { name: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Job store (state directory) errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobState,
        to: JobState,
    },

    #[error("Job {id} is no longer in {state}")]
    Vanished { id: String, state: JobState },

    #[error("Job {id} already exists in {state}")]
    Occupied { id: String, state: JobState },

    #[error("Not a job descriptor path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that send a single job to `failed/`. None of them stop the worker.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Script not found: {name}")]
    ScriptNotFound { name: String },

    #[error("Job {id} has no valid input files")]
    NoValidInputs { id: String },

    #[error("Script {script} exited with status {}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ScriptExecutionFailed { script: String, code: Option<i32> },

    #[error("Invalid descriptor for job {id}: {reason}")]
    InvalidDescriptor { id: String, reason: String },

    #[error("Results already exist at {}", .path.display())]
    ResultsExist { path: PathBuf },

    #[error("Failed to spawn {script}: {reason}")]
    Spawn { script: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Liveness file errors. Logged and ignored by the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("Failed to serialize heartbeat: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
