//! Local script cache mirrored from the registry.
//!
//! Files already on disk are never downloaded again, so a sync against an
//! unchanged registry touches nothing but `installed.json`.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::context::{WorkerContext, is_plain_file_name};
use crate::error::{JobError, SyncError};
use crate::scripts::registry::{RegistrySource, ScriptEntry};

/// Summary of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries written to the installed registry.
    pub installed: usize,
    /// Files fetched from the registry this cycle.
    pub downloaded: usize,
    /// Modules skipped because their manifest or files could not be fetched.
    pub skipped_modules: Vec<String>,
}

/// Cache of executable scripts under `system/scripts`.
pub struct ScriptCache {
    scripts_dir: PathBuf,
    fallback_dir: PathBuf,
    registry_path: PathBuf,
    source: Option<Box<dyn RegistrySource>>,
}

impl ScriptCache {
    /// Cache for `ctx`. Without a source, `sync` does nothing.
    pub fn new(ctx: &WorkerContext, source: Option<Box<dyn RegistrySource>>) -> Self {
        Self {
            scripts_dir: ctx.scripts_dir(),
            fallback_dir: ctx.root().to_path_buf(),
            registry_path: ctx.installed_registry_path(),
            source,
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Mirror the registry into the scripts directory and rewrite the
    /// installed registry. Fails only when the module list itself cannot be
    /// fetched or the registry file cannot be written; the existing cache is
    /// left untouched in that case.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let Some(source) = self.source.as_deref() else {
            debug!("No script registry configured, skipping sync");
            return Ok(SyncReport::default());
        };

        info!("Checking for script updates");
        fs::create_dir_all(&self.scripts_dir).await?;
        let modules = source.modules().await?;

        let mut report = SyncReport::default();
        let mut installed = Vec::new();

        for module in &modules {
            debug!(module = %module, "Syncing module");
            if let Err(e) = self
                .sync_module(source, module, &mut installed, &mut report)
                .await
            {
                warn!(module = %module, error = %e, "Skipping module");
                report.skipped_modules.push(module.clone());
            }
        }

        self.write_registry(&installed).await?;
        report.installed = installed.len();
        info!(
            installed = report.installed,
            downloaded = report.downloaded,
            skipped = report.skipped_modules.len(),
            "Script sync finished"
        );
        Ok(report)
    }

    async fn sync_module(
        &self,
        source: &dyn RegistrySource,
        module: &str,
        installed: &mut Vec<ScriptEntry>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        if !is_plain_file_name(module) {
            return Err(SyncError::UnsafeName {
                name: module.to_string(),
            });
        }
        let manifest = source.manifest(module).await?;

        for entry in manifest {
            if let Some(bad) = std::iter::once(&entry.script_file)
                .chain(&entry.assets)
                .find(|name| !is_plain_file_name(name))
            {
                warn!(module, file = %bad, "Skipping entry with unsafe file name");
                continue;
            }

            if self
                .ensure_file(source, module, &entry.script_file, true)
                .await?
            {
                report.downloaded += 1;
            }
            for asset in &entry.assets {
                if self.ensure_file(source, module, asset, false).await? {
                    report.downloaded += 1;
                }
            }
            installed.push(entry);
        }
        Ok(())
    }

    /// Download `file` unless it already exists. Returns whether it was fetched.
    async fn ensure_file(
        &self,
        source: &dyn RegistrySource,
        module: &str,
        file: &str,
        executable: bool,
    ) -> Result<bool, SyncError> {
        let target = self.scripts_dir.join(file);
        if fs::try_exists(&target).await? {
            return Ok(false);
        }

        info!(module, file, "Downloading");
        let body = source.fetch(module, file).await?;
        // A partial download must never look like a cached file.
        let partial = self.scripts_dir.join(format!(".{file}.part"));
        fs::write(&partial, &body).await?;
        if executable {
            make_executable(&partial).await?;
        }
        fs::rename(&partial, &target).await?;
        Ok(true)
    }

    async fn write_registry(&self, entries: &[ScriptEntry]) -> Result<(), SyncError> {
        let tmp = self.registry_path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        fs::rename(&tmp, &self.registry_path).await?;
        Ok(())
    }

    /// Entries recorded by the last successful sync.
    pub async fn installed(&self) -> Result<Vec<ScriptEntry>, SyncError> {
        match fs::read(&self.registry_path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Locate a script: the scripts directory first, then the workspace root.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, JobError> {
        let not_found = || JobError::ScriptNotFound {
            name: name.to_string(),
        };
        let relative = Path::new(name);
        if name.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(not_found());
        }

        for dir in [&self.scripts_dir, &self.fallback_dir] {
            let candidate = dir.join(relative);
            if fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
                return Ok(candidate);
            }
        }
        Err(not_found())
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
