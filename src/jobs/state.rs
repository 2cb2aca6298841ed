//! Job state machine.
//!
//! Every state is a directory under `<project>/jobs/`; a job's state is the
//! directory its descriptor file currently sits in.

use serde::{Deserialize, Serialize};

/// State of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Dropped by a producer, waiting to be picked up.
    Queued,
    /// Claimed by a worker; its script is running.
    Processing,
    /// Script exited 0.
    Completed,
    /// Something went wrong. Never retried.
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Queued,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
    ];

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Queued, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Directory name under `<project>/jobs/`.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Queued => "queue",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
