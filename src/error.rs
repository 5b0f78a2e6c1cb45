//! Error types for the harvester
//!
//! Typed failures for every stage. Per-item failures are not fatal: the
//! stage turns them into [`crate::report::FetchFailure`] entries and keeps
//! going. Only configuration and output errors stop a run.

use thiserror::Error;

/// Main error type for the harvester
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected payload for {context}: {message}")]
    Shape { context: String, message: String },

    #[error("Code '{code}' in {axis} of table {type_code} has width {found}, expected {expected}")]
    CodeWidth {
        type_code: String,
        axis: String,
        code: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HarvestError {
    pub fn shape(context: impl Into<String>, message: impl Into<String>) -> Self {
        HarvestError::Shape {
            context: context.into(),
            message: message.into(),
        }
    }

    /// True when the remote side answered with a status outside 2xx
    pub fn is_status(&self) -> bool {
        matches!(self, HarvestError::Status { .. })
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;

/// Keep logged response bodies short
pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(200).collect()
}
