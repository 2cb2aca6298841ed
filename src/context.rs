//! Process-wide worker context.
//!
//! Owns the workspace root and every path derived from it. Built once at
//! startup with [`WorkerContext::init`] and torn down with
//! [`WorkerContext::cleanup`] when the worker is interrupted.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::ConfigError;
use crate::heartbeat::Heartbeat;

/// Well-known workspace paths, relative to the root.
pub mod paths {
    pub const HEARTBEAT: &str = "system/status.json";
    pub const SCRIPTS_DIR: &str = "system/scripts";
    pub const INSTALLED_REGISTRY: &str = "system/scripts/installed.json";
}

/// True when `name` is exactly one normal path component (no separators,
/// no `.` or `..`, not absolute).
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !name.contains(['/', '\\'])
}

/// Owned worker state shared by the cache, store, runner and loop.
#[derive(Debug)]
pub struct WorkerContext {
    root: PathBuf,
    config: WorkerConfig,
    heartbeat: Heartbeat,
}

impl WorkerContext {
    /// Resolve the root, create `system/scripts`, and build the context.
    pub async fn init(mut config: WorkerConfig) -> Result<Self, ConfigError> {
        let root = fs::canonicalize(&config.root).await.map_err(|e| {
            ConfigError::InvalidValue {
                key: "CEM_ROOT".to_string(),
                message: format!("{}: {e}", config.root.display()),
            }
        })?;
        fs::create_dir_all(root.join(paths::SCRIPTS_DIR)).await?;
        config.root = root.clone();

        info!(root = %root.display(), "Worker context initialized");
        Ok(Self {
            heartbeat: Heartbeat::new(root.join(paths::HEARTBEAT), root.clone()),
            root,
            config,
        })
    }

    /// Workspace root (canonical).
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Directory holding downloaded scripts and assets.
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join(paths::SCRIPTS_DIR)
    }

    /// The persisted installed-scripts registry.
    pub fn installed_registry_path(&self) -> PathBuf {
        self.root.join(paths::INSTALLED_REGISTRY)
    }

    /// Release process-wide state on shutdown.
    pub async fn cleanup(&self) {
        if let Err(e) = self.heartbeat.clear().await {
            warn!(error = %e, "Failed to remove heartbeat file");
        }
        info!("Worker context cleaned up");
    }
}
