//! Search index loading (OpenSearch / Elasticsearch)
//!
//! Every run writes to a fresh index named `{dataset}-{epoch}` so reruns
//! never touch a previous run's data. Rejected requests are logged with the
//! response body and the load continues with the next batch.

use async_trait::async_trait;
use indicatif::ProgressBar;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

use super::FlatRecord;
use crate::config::HarvestConfig;
use crate::error::{truncate_body, HarvestError, Result};
use crate::report::{FailureReport, Stage};

#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Create `index` with an explicit field mapping
    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()>;

    /// Store a single document under `id`
    async fn put_document(&self, index: &str, id: &str, document: &Value) -> Result<()>;

    /// Submit a newline-delimited action/document body; returns the response body
    async fn bulk(&self, body: String) -> Result<Value>;
}

pub fn index_name(dataset: &str, epoch: i64) -> String {
    format!("{}-{}", dataset, epoch)
}

pub fn epoch_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct HttpIndexSink {
    http: Client,
    base_url: String,
}

impl HttpIndexSink {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|source| HarvestError::Transport {
                url: config.index_url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            base_url: config.index_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: String,
        expected: u16,
    ) -> Result<String> {
        let response = request
            .send()
            .await
            .map_err(|source| HarvestError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status != expected {
            return Err(HarvestError::Status {
                url,
                status,
                body: truncate_body(&body),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl IndexSink for HttpIndexSink {
    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()> {
        let url = format!("{}/{}", self.base_url, index);
        self.send(self.http.put(&url).json(mapping), url, 200).await?;
        Ok(())
    }

    async fn put_document(&self, index: &str, id: &str, document: &Value) -> Result<()> {
        let url = format!("{}/{}/_doc/{}", self.base_url, index, id);
        self.send(self.http.put(&url).json(document), url, 201).await?;
        Ok(())
    }

    async fn bulk(&self, body: String) -> Result<Value> {
        let url = format!("{}/_bulk", self.base_url);
        let request = self
            .http
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        let text = self.send(request, url.clone(), 200).await?;
        serde_json::from_str(&text).map_err(|source| HarvestError::Decode { url, source })
    }
}

/// Records every call in memory. Bulk calls whose ordinal (0-based) is in
/// `reject` answer a 400.
#[derive(Default)]
pub struct MemoryIndexSink {
    reject: HashSet<usize>,
    indices: Mutex<Vec<(String, Value)>>,
    documents: Mutex<Vec<(String, String, Value)>>,
    bulks: Mutex<Vec<String>>,
}

impl MemoryIndexSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(batches: impl IntoIterator<Item = usize>) -> Self {
        Self {
            reject: batches.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn indices(&self) -> Vec<(String, Value)> {
        self.indices.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn documents(&self) -> Vec<(String, String, Value)> {
        self.documents.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn bulks(&self) -> Vec<String> {
        self.bulks.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl IndexSink for MemoryIndexSink {
    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()> {
        if let Ok(mut indices) = self.indices.lock() {
            indices.push((index.to_string(), mapping.clone()));
        }
        Ok(())
    }

    async fn put_document(&self, index: &str, id: &str, document: &Value) -> Result<()> {
        if let Ok(mut documents) = self.documents.lock() {
            documents.push((index.to_string(), id.to_string(), document.clone()));
        }
        Ok(())
    }

    async fn bulk(&self, body: String) -> Result<Value> {
        let ordinal = match self.bulks.lock() {
            Ok(mut bulks) => {
                bulks.push(body);
                bulks.len() - 1
            }
            Err(_) => 0,
        };
        if self.reject.contains(&ordinal) {
            return Err(HarvestError::Status {
                url: "memory://_bulk".to_string(),
                status: 400,
                body: "rejected".to_string(),
            });
        }
        Ok(json!({"errors": false, "items": []}))
    }
}

/// Outcome of loading one index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub index: String,
    pub created: bool,
    pub documents: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub failed_documents: usize,
}

/// Two lines per record: the index action, then the document
pub fn bulk_body<R: FlatRecord>(index: &str, records: &[&R]) -> Result<String> {
    let mut lines = Vec::with_capacity(records.len() * 2);
    for record in records {
        let action = json!({"index": {"_index": index, "_id": record.document_id()}});
        lines.push(serde_json::to_string(&action)?);
        lines.push(serde_json::to_string(&record.to_document()?)?);
    }
    let mut body = lines.join("\n");
    body.push('\n');
    Ok(body)
}

/// Item-level failures inside an accepted bulk response
fn rejected_items(response: &Value) -> usize {
    if response.get("errors").and_then(Value::as_bool) != Some(true) {
        return 0;
    }
    response
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| {
                    item.get("index")
                        .and_then(|action| action.get("status"))
                        .and_then(Value::as_u64)
                        .map(|status| status >= 300)
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

pub struct BulkIndexer<'a> {
    sink: &'a dyn IndexSink,
    batch_size: usize,
    progress: ProgressBar,
}

impl<'a> BulkIndexer<'a> {
    pub fn new(sink: &'a dyn IndexSink, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Create the index; a rejection is logged and loading still proceeds
    pub async fn create_index(
        &self,
        index: &str,
        mapping: &Value,
        failures: &mut FailureReport,
    ) -> bool {
        match self.sink.create_index(index, mapping).await {
            Ok(()) => {
                info!("Index {} created successfully", index);
                true
            }
            Err(e) => {
                failures.record(Stage::Index, index, e);
                false
            }
        }
    }

    /// Load `records` in batches of `batch_size` through `_bulk`
    pub async fn bulk_index<R: FlatRecord>(
        &self,
        index: &str,
        records: &[&R],
        failures: &mut FailureReport,
    ) -> Result<IndexReport> {
        let mut report = IndexReport {
            index: index.to_string(),
            ..IndexReport::default()
        };
        self.progress.set_length(records.len() as u64);
        self.progress.set_message(format!("indexing {}", index));

        for (i, batch) in records.chunks(self.batch_size).enumerate() {
            let body = bulk_body(index, batch)?;
            report.batches += 1;
            match self.sink.bulk(body).await {
                Ok(response) => {
                    let rejected = rejected_items(&response);
                    if rejected > 0 {
                        warn!(
                            index = %index,
                            batch = i,
                            "{} documents rejected in bulk batch", rejected
                        );
                        report.failed_documents += rejected;
                    }
                    report.documents += batch.len().saturating_sub(rejected);
                }
                Err(e) => {
                    report.failed_batches += 1;
                    report.failed_documents += batch.len();
                    failures.record(Stage::Index, format!("{}#batch{}", index, i), e);
                }
            }
            self.progress.inc(batch.len() as u64);
        }

        self.progress.finish_with_message(format!("indexed {}", index));
        info!(
            "Bulk indexed {} documents into {} ({} of {} batches failed)",
            report.documents, index, report.failed_batches, report.batches
        );
        Ok(report)
    }

    /// Load `records` one PUT per document
    pub async fn index_each<R: FlatRecord>(
        &self,
        index: &str,
        records: &[&R],
        failures: &mut FailureReport,
    ) -> Result<IndexReport> {
        let mut report = IndexReport {
            index: index.to_string(),
            ..IndexReport::default()
        };
        self.progress.set_length(records.len() as u64);

        for record in records {
            let id = record.document_id();
            let document = Value::Object(record.to_document()?);
            match self.sink.put_document(index, &id, &document).await {
                Ok(()) => report.documents += 1,
                Err(e) => {
                    report.failed_documents += 1;
                    failures.record(Stage::Index, id, e);
                }
            }
            self.progress.inc(1);
        }

        self.progress.finish_with_message(format!("indexed {}", index));
        info!("Indexed {} documents into {}", report.documents, index);
        Ok(report)
    }
}
