//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Upstream script registry (raw repository root).
pub const DEFAULT_REGISTRY_URL: &str =
    "https://raw.githubusercontent.com/xHrid/cem-scripts/refs/heads/main";

/// Script run when a descriptor does not name one.
pub const DEFAULT_SCRIPT: &str = "core_script.py";

/// Directory that job-relative paths are resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathBase {
    /// The project directory that owns the job (`<root>/<project>`).
    #[default]
    Project,
    /// The workspace root the watcher was started in.
    Root,
}

impl FromStr for PathBase {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project" => Ok(Self::Project),
            "root" => Ok(Self::Root),
            other => Err(ConfigError::InvalidValue {
                key: "CEM_PATH_BASE".to_string(),
                message: format!("expected `project` or `root`, got `{other}`"),
            }),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Workspace root containing `system/` and the project directories.
    pub root: PathBuf,
    /// Sleep between ticks.
    pub poll_interval: Duration,
    /// Registry base URL. `None` disables script sync entirely.
    pub registry_url: Option<String>,
    /// Re-sync scripts this often. `None` syncs once at startup.
    pub resync_interval: Option<Duration>,
    /// Program used to run scripts. `None` executes the script directly.
    pub interpreter: Option<String>,
    /// Script used when a descriptor omits `script_name`.
    pub default_script: String,
    /// Base directory for `input_files` and project-local noise files.
    pub path_base: PathBase,
    /// Optional directory for a daily rolling log file.
    pub log_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            poll_interval: Duration::from_secs(2),
            registry_url: Some(DEFAULT_REGISTRY_URL.to_string()),
            resync_interval: None,
            interpreter: Some("python3".to_string()),
            default_script: DEFAULT_SCRIPT.to_string(),
            path_base: PathBase::Project,
            log_dir: None,
        }
    }
}

impl WorkerConfig {
    /// Build configuration from `CEM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let root = match lookup("CEM_ROOT") {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => std::env::current_dir()?,
        };

        let poll_interval = match lookup("CEM_POLL_INTERVAL_SECS") {
            Some(v) => match parse_secs("CEM_POLL_INTERVAL_SECS", &v)? {
                0 => {
                    return Err(ConfigError::InvalidValue {
                        key: "CEM_POLL_INTERVAL_SECS".to_string(),
                        message: "must be at least 1 second".to_string(),
                    });
                }
                secs => Duration::from_secs(secs),
            },
            None => defaults.poll_interval,
        };

        // Present-but-empty disables sync; absent keeps the upstream default.
        let registry_url = match lookup("CEM_REGISTRY_URL") {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url.trim().trim_end_matches('/').to_string()),
            None => defaults.registry_url,
        };

        let resync_interval = match lookup("CEM_RESYNC_INTERVAL_SECS") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => match parse_secs("CEM_RESYNC_INTERVAL_SECS", &v)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => None,
        };

        let interpreter = match lookup("CEM_SCRIPT_INTERPRETER") {
            Some(p) if p.trim().is_empty() => None,
            Some(p) => Some(p.trim().to_string()),
            None => defaults.interpreter,
        };

        let default_script = lookup("CEM_DEFAULT_SCRIPT")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.default_script);

        let path_base = match lookup("CEM_PATH_BASE") {
            Some(v) => v.parse()?,
            None => defaults.path_base,
        };

        let log_dir = lookup("CEM_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            root,
            poll_interval,
            registry_url,
            resync_interval,
            interpreter,
            default_script,
            path_base,
            log_dir,
        })
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("`{value}` is not a number of seconds: {e}"),
        })
}
