//! Harvester configuration
//!
//! Defaults reproduce the constants the harvester has always run with.
//! A YAML file may override any subset of them; the CLI overrides single
//! values on top of that.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{HarvestError, Result};

pub const DEFAULT_API_BASE: &str = "https://www.eciemaps.sanidad.gob.es";
pub const DEFAULT_EDITION: &str = "2024";
pub const DEFAULT_INDEX_URL: &str = "http://localhost:9200";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_AXIS_WINDOW: usize = 10;
pub const DEFAULT_DETAIL_WINDOW: usize = 25;
pub const DEFAULT_DETAIL_CHUNKS: usize = 100;
pub const DEFAULT_SECTION_WINDOW: usize = 10;
pub const DEFAULT_BULK_BATCH_SIZE: usize = 100;
pub const DEFAULT_TYPE_CODE_WIDTH: usize = 3;
pub const DEFAULT_AXIS_CODE_WIDTH: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Root of the classification API
    pub api_base: String,
    /// Classification edition, part of most endpoint paths
    pub edition: String,
    /// OpenSearch / Elasticsearch root
    pub index_url: String,
    pub request_timeout_secs: u64,
    /// In-flight window for axis-table requests
    pub axis_window: usize,
    /// In-flight window for detail requests, per chunk
    pub detail_window: usize,
    /// Number of round-robin chunks the detail requests are split into
    pub detail_chunks: usize,
    /// In-flight window for diagnosis sections and chemical letters
    pub section_window: usize,
    pub bulk_batch_size: usize,
    /// Width of a procedure class code (section + body system + operation)
    pub type_code_width: usize,
    /// Width of every axis label code
    pub axis_code_width: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            edition: DEFAULT_EDITION.to_string(),
            index_url: DEFAULT_INDEX_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            axis_window: DEFAULT_AXIS_WINDOW,
            detail_window: DEFAULT_DETAIL_WINDOW,
            detail_chunks: DEFAULT_DETAIL_CHUNKS,
            section_window: DEFAULT_SECTION_WINDOW,
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
            type_code_width: DEFAULT_TYPE_CODE_WIDTH,
            axis_code_width: DEFAULT_AXIS_CODE_WIDTH,
        }
    }
}

impl HarvestConfig {
    /// Load from a YAML file; keys not present keep their defaults
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        info!("Loading harvest configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("axis_window", self.axis_window),
            ("detail_window", self.detail_window),
            ("detail_chunks", self.detail_chunks),
            ("section_window", self.section_window),
            ("bulk_batch_size", self.bulk_batch_size),
            ("type_code_width", self.type_code_width),
            ("axis_code_width", self.axis_code_width),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(HarvestError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.api_base.trim().is_empty() {
            return Err(HarvestError::Config("api_base is empty".to_string()));
        }
        if self.index_url.trim().is_empty() {
            return Err(HarvestError::Config("index_url is empty".to_string()));
        }
        Ok(())
    }

    // Endpoint paths, relative to api_base

    pub fn types_path(&self) -> String {
        format!("/cie10pcs/{}/tab/t1", self.edition)
    }

    pub fn subtypes_path(&self, type_code: &str) -> String {
        format!("/cie10pcs/{}/tab/t2/{}", self.edition, type_code)
    }

    pub fn procedure_classes_path(&self, subtype_code: &str) -> String {
        format!("/cie10pcs/{}/tab/t3/{}", self.edition, subtype_code)
    }

    pub fn axis_table_path(&self, type_code: &str) -> String {
        format!("/cie10pcs/{}/lt/table/{}", self.edition, type_code)
    }

    /// The detail endpoint is not versioned by edition
    pub fn procedure_detail_path(&self, code: &str) -> String {
        format!("/ref/cie10pcs/{}", code)
    }

    pub fn diagnosis_section_path(&self, prefix: &str) -> String {
        format!("/cie10mc/{}/lt/sec/{}", self.edition, prefix)
    }

    pub fn chemicals_path(&self, letter: &str) -> String {
        format!("/cie10mc/{}/ia/drugsByLetter/{}", self.edition, letter)
    }
}
