//! End-to-end harvest runs
//!
//! Each pipeline fetches its dataset, writes the CSV export and loads a
//! fresh search index. Fetch and index failures end up in the run's
//! [`FailureReport`]; only configuration and CSV write errors abort a run.

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::chemicals::{chemical_mapping, ChemicalHarvester, ChemicalMap, CHEMICAL_FIELDS};
use crate::config::HarvestConfig;
use crate::diagnoses::{diagnosis_mapping, DiagnosisHarvester, DiagnosisMap, DIAGNOSIS_FIELDS};
use crate::eciemaps::ClassificationApi;
use crate::enricher::{procedure_mapping, EnrichedMap, Enricher, PROCEDURE_FIELDS};
use crate::error::Result;
use crate::expander::Expander;
use crate::report::FailureReport;
use crate::sink::{
    epoch_now, index_name, write_csv_file, BulkIndexer, FlatRecord, IndexReport, IndexSink,
};
use crate::taxonomy::TaxonomyFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// `_bulk` requests of `bulk_batch_size` documents
    #[default]
    Bulk,
    /// One PUT per document
    PerDocument,
    Disabled,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub csv_path: Option<PathBuf>,
    pub index_mode: IndexMode,
    pub show_progress: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport<T> {
    pub dataset: &'static str,
    pub records: T,
    pub csv_rows: Option<usize>,
    pub index: Option<IndexReport>,
    pub failures: FailureReport,
}

impl<K, V> RunReport<BTreeMap<K, V>> {
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{}: {} records", self.dataset, self.records.len())];
        if let Some(rows) = self.csv_rows {
            parts.push(format!("{} csv rows", rows));
        }
        if let Some(index) = &self.index {
            parts.push(format!(
                "{} documents indexed into {} ({} failed)",
                index.documents, index.index, index.failed_documents
            ));
        }
        parts.push(self.failures.to_string());
        parts.join(", ")
    }
}

/// Shared plumbing: API, index sink, config and run options
pub struct Harvest<'a> {
    api: &'a dyn ClassificationApi,
    sink: &'a dyn IndexSink,
    config: &'a HarvestConfig,
    options: RunOptions,
}

impl<'a> Harvest<'a> {
    pub fn new(
        api: &'a dyn ClassificationApi,
        sink: &'a dyn IndexSink,
        config: &'a HarvestConfig,
        options: RunOptions,
    ) -> Self {
        Self {
            api,
            sink,
            config,
            options,
        }
    }

    fn progress(&self, prefix: &'static str) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(0);
        progress.set_prefix(prefix);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} {prefix:.bold} [{elapsed_precise}] [{bar:32.cyan/blue}] \
{pos}/{len} ({percent}%) eta {eta_precise} {msg}",
        ) {
            progress.set_style(style.progress_chars("=> "));
        }
        progress.enable_steady_tick(Duration::from_millis(250));
        progress
    }

    /// CSV first, then the index. Returns `(csv_rows, index_report)`.
    async fn write_outputs<R: FlatRecord>(
        &self,
        dataset: &'static str,
        records: Vec<&R>,
        fields: &[&str],
        mapping: Value,
        failures: &mut FailureReport,
    ) -> Result<(Option<usize>, Option<IndexReport>)> {
        let csv_rows = match &self.options.csv_path {
            Some(path) => Some(write_csv_file(path, records.iter().copied(), fields)?),
            None => None,
        };

        if self.options.index_mode == IndexMode::Disabled {
            return Ok((csv_rows, None));
        }

        let index = index_name(dataset, epoch_now());
        let indexer = BulkIndexer::new(self.sink, self.config.bulk_batch_size)
            .with_progress(self.progress("INDEX"));
        let created = indexer.create_index(&index, &mapping, failures).await;

        let mut report = match self.options.index_mode {
            IndexMode::PerDocument => indexer.index_each(&index, &records, failures).await?,
            _ => indexer.bulk_index(&index, &records, failures).await?,
        };
        report.created = created;
        Ok((csv_rows, Some(report)))
    }
}

pub struct ProcedurePipeline<'a> {
    harvest: Harvest<'a>,
}

impl<'a> ProcedurePipeline<'a> {
    pub fn new(harvest: Harvest<'a>) -> Self {
        Self { harvest }
    }

    pub async fn run(&self) -> Result<RunReport<EnrichedMap>> {
        let h = &self.harvest;
        h.config.validate()?;
        let mut failures = FailureReport::new();

        let classes = TaxonomyFetcher::new(h.api, h.config)
            .fetch_all()
            .await
            .into_value(&mut failures);
        let combinations = Expander::new(h.api, h.config)
            .with_progress(h.progress("TABLES"))
            .expand(&classes)
            .await
            .into_value(&mut failures);
        let records = Enricher::new(h.api, h.config)
            .with_progress(h.progress("DETAILS"))
            .enrich(combinations)
            .await
            .into_value(&mut failures);

        let (csv_rows, index) = h
            .write_outputs(
                "procedures",
                records.values().collect(),
                PROCEDURE_FIELDS,
                procedure_mapping(),
                &mut failures,
            )
            .await?;

        let report = RunReport {
            dataset: "procedures",
            records,
            csv_rows,
            index,
            failures,
        };
        info!("{}", report.summary());
        Ok(report)
    }
}

pub struct DiagnosisPipeline<'a> {
    harvest: Harvest<'a>,
}

impl<'a> DiagnosisPipeline<'a> {
    pub fn new(harvest: Harvest<'a>) -> Self {
        Self { harvest }
    }

    pub async fn run(&self) -> Result<RunReport<DiagnosisMap>> {
        let h = &self.harvest;
        h.config.validate()?;
        let mut failures = FailureReport::new();

        let records = DiagnosisHarvester::new(h.api, h.config)
            .with_progress(h.progress("SECTIONS"))
            .harvest()
            .await
            .into_value(&mut failures);

        let (csv_rows, index) = h
            .write_outputs(
                "diagnoses",
                records.values().collect(),
                DIAGNOSIS_FIELDS,
                diagnosis_mapping(),
                &mut failures,
            )
            .await?;

        let report = RunReport {
            dataset: "diagnoses",
            records,
            csv_rows,
            index,
            failures,
        };
        info!("{}", report.summary());
        Ok(report)
    }
}

pub struct ChemicalPipeline<'a> {
    harvest: Harvest<'a>,
}

impl<'a> ChemicalPipeline<'a> {
    pub fn new(harvest: Harvest<'a>) -> Self {
        Self { harvest }
    }

    pub async fn run(&self) -> Result<RunReport<ChemicalMap>> {
        let h = &self.harvest;
        h.config.validate()?;
        let mut failures = FailureReport::new();

        let records = ChemicalHarvester::new(h.api, h.config)
            .with_progress(h.progress("LETTERS"))
            .harvest()
            .await
            .into_value(&mut failures);

        let (csv_rows, index) = h
            .write_outputs(
                "chemicals",
                records.values().collect(),
                CHEMICAL_FIELDS,
                chemical_mapping(),
                &mut failures,
            )
            .await?;

        let report = RunReport {
            dataset: "chemicals",
            records,
            csv_rows,
            index,
            failures,
        };
        info!("{}", report.summary());
        Ok(report)
    }
}
