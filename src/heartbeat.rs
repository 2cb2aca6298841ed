//! Liveness record rewritten on every worker tick.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::HeartbeatError;

/// Contents of `system/status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub status: String,
    pub last_active_ts: DateTime<Local>,
    pub worker_pid: u32,
    pub root_path: PathBuf,
}

/// Writer for the heartbeat file.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    path: PathBuf,
    root: PathBuf,
}

impl Heartbeat {
    pub fn new(path: PathBuf, root: PathBuf) -> Self {
        Self { path, root }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the heartbeat with the current time.
    pub async fn beat(&self) -> Result<(), HeartbeatError> {
        let record = HeartbeatRecord {
            status: "online".to_string(),
            last_active_ts: Local::now(),
            worker_pid: std::process::id(),
            root_path: self.root.clone(),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, serde_json::to_vec(&record)?).await?;
        Ok(())
    }

    /// Remove the heartbeat file. Missing is fine.
    pub async fn clear(&self) -> Result<(), HeartbeatError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
