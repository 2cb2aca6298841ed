//! Remote script registry.
//!
//! Layout served under a base URL:
//! - `scripts.json` — JSON array of module names
//! - `<module>/manifest.json` — JSON array of [`ScriptEntry`]
//! - `<module>/<file>` — script and asset bodies

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::SyncError;

/// One script published by a registry module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub script_file: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<String>,
    /// Display metadata (name, description, ...) kept for the front end.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ScriptEntry {
    pub fn new(script_file: impl Into<String>) -> Self {
        Self {
            script_file: script_file.into(),
            assets: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assets = assets.into_iter().map(Into::into).collect();
        self
    }
}

/// Source of registry data.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Top-level list of module names.
    async fn modules(&self) -> Result<Vec<String>, SyncError>;

    /// Entries published by one module.
    async fn manifest(&self, module: &str) -> Result<Vec<ScriptEntry>, SyncError>;

    /// Raw contents of a script or asset file in a module.
    async fn fetch(&self, module: &str, file: &str) -> Result<Vec<u8>, SyncError>;
}

/// Upper bound on one registry request, body included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry served over HTTP (e.g. a raw git hosting URL).
pub struct HttpRegistry {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Run one request against the timeout. A registry that stalls must not
    /// hold the worker loop.
    async fn bounded<T>(
        &self,
        url: &str,
        request: impl Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Request {
                url: url.to_string(),
                reason: format!("timed out after {:?}", self.request_timeout),
            }),
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, SyncError> {
        let request_failed = |e: reqwest::Error| SyncError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };
        self.client
            .get(url)
            .send()
            .await
            .map_err(request_failed)?
            .error_for_status()
            .map_err(request_failed)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SyncError> {
        self.bounded(url, async {
            self.get(url)
                .await?
                .json()
                .await
                .map_err(|e| SyncError::InvalidPayload {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
        })
        .await
    }
}

#[async_trait]
impl RegistrySource for HttpRegistry {
    async fn modules(&self) -> Result<Vec<String>, SyncError> {
        self.get_json(&self.url("scripts.json")).await
    }

    async fn manifest(&self, module: &str) -> Result<Vec<ScriptEntry>, SyncError> {
        self.get_json(&self.url(&format!("{module}/manifest.json")))
            .await
    }

    async fn fetch(&self, module: &str, file: &str) -> Result<Vec<u8>, SyncError> {
        let url = self.url(&format!("{module}/{file}"));
        let bytes = self
            .bounded(&url, async {
                self.get(&url)
                    .await?
                    .bytes()
                    .await
                    .map_err(|e| SyncError::Request {
                        url: url.clone(),
                        reason: e.to_string(),
                    })
            })
            .await?;
        Ok(bytes.to_vec())
    }
}
