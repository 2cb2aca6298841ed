//! Job descriptor files and their parameter schema.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A scalar parameter value, passed to the script as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Recognized job parameters. Everything else lands in `unrecognized`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<Scalar>,
    /// Static noise profile: a shared resource name, an absolute path, or a
    /// path inside the project tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_noise_file: Option<String>,
    /// Resolve `static_noise_file` against the path base. When absent, paths
    /// mentioning `spots/` or `project_` are treated as project-local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_noise_project_relative: Option<bool>,
    #[serde(flatten)]
    pub unrecognized: BTreeMap<String, serde_json::Value>,
}

impl JobParameters {
    /// Names of parameters that will not be forwarded to the script.
    pub fn unrecognized_keys(&self) -> Vec<&str> {
        self.unrecognized.keys().map(String::as_str).collect()
    }

    /// Whether the noise file should be resolved against `base`.
    pub fn noise_file_is_project_relative(&self, noise_file: &str) -> bool {
        if Path::new(noise_file).is_absolute() {
            return false;
        }
        self.static_noise_project_relative
            .unwrap_or_else(|| noise_file.contains("spots/") || noise_file.contains("project_"))
    }

    /// Optional script flags in their fixed order.
    pub fn cli_args(&self, base: &Path) -> Vec<OsString> {
        let mut args = Vec::new();
        let scalars = [
            ("--lat", &self.lat),
            ("--lon", &self.lon),
            ("--min-confidence", &self.min_confidence),
        ];
        for (flag, value) in scalars {
            if let Some(value) = value {
                args.push(OsString::from(flag));
                args.push(OsString::from(value.to_string()));
            }
        }

        if let Some(noise) = self.static_noise_file.as_deref().filter(|s| !s.is_empty()) {
            args.push(OsString::from("--static-noise-file"));
            if self.noise_file_is_project_relative(noise) {
                args.push(base.join(noise).into_os_string());
            } else {
                args.push(OsString::from(noise));
            }
        }
        args
    }
}

/// Contents of a `jobs/queue/*.json` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
    #[serde(default)]
    pub parameters: JobParameters,
    #[serde(default)]
    pub input_files: Vec<String>,
}

impl JobDescriptor {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// The requested script, or `default` when none was named.
    pub fn script_name_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.script_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default)
    }
}
