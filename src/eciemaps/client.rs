//! eCIEMaps API client
//!
//! HTTP client for the Spanish Ministry of Health classification browser,
//! plus an in-memory implementation serving canned payloads.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::HarvestConfig;
use crate::error::{truncate_body, HarvestError, Result};

/// Source of classification JSON, addressed by path relative to the API root
#[async_trait]
pub trait ClassificationApi: Send + Sync {
    async fn get_json(&self, path: &str) -> Result<Value>;
}

/// GET `path` and decode it into `T`
pub async fn fetch<T: DeserializeOwned>(api: &dyn ClassificationApi, path: &str) -> Result<T> {
    let value = api.get_json(path).await?;
    serde_json::from_value(value).map_err(|source| HarvestError::Decode {
        url: path.to_string(),
        source,
    })
}

pub struct EciemapsClient {
    http: Client,
    base_url: String,
}

impl EciemapsClient {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|source| HarvestError::Transport {
                url: config.api_base.clone(),
                source,
            })?;

        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ClassificationApi for EciemapsClient {
    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "GET");

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| HarvestError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| HarvestError::Transport {
                url: url.clone(),
                source,
            })?;

        if !status.is_success() {
            return Err(HarvestError::Status {
                url,
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        serde_json::from_str(&text).map_err(|source| HarvestError::Decode { url, source })
    }
}

/// Serves canned payloads by path. Unknown paths answer 404, paths marked
/// with [`StaticApi::fail`] answer the given status.
#[derive(Default)]
pub struct StaticApi {
    payloads: HashMap<String, Value>,
    failing: HashMap<String, u16>,
    requested: Mutex<Vec<String>>,
}

impl StaticApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, payload: Value) -> Self {
        self.insert(path, payload);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, payload: Value) {
        self.payloads.insert(path.into(), payload);
    }

    pub fn fail(mut self, path: impl Into<String>, status: u16) -> Self {
        self.failing.insert(path.into(), status);
        self
    }

    /// Paths requested so far, in request order
    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClassificationApi for StaticApi {
    async fn get_json(&self, path: &str) -> Result<Value> {
        if let Ok(mut log) = self.requested.lock() {
            log.push(path.to_string());
        }
        // Yield so concurrent callers interleave like real I/O
        tokio::task::yield_now().await;

        if let Some(status) = self.failing.get(path) {
            return Err(HarvestError::Status {
                url: path.to_string(),
                status: *status,
                body: String::new(),
            });
        }
        self.payloads
            .get(path)
            .cloned()
            .ok_or_else(|| HarvestError::Status {
                url: path.to_string(),
                status: 404,
                body: String::new(),
            })
    }
}
