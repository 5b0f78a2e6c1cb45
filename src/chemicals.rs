//! Drug and chemical index harvest
//!
//! The index is listed by first letter. Only leaf (`finalNode`) entries
//! carry codes and are kept.

use indicatif::ProgressBar;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::HarvestConfig;
use crate::eciemaps::{fetch, flag_set, value_text, ChemicalEntry, ClassificationApi};
use crate::fanout::for_each_bounded;
use crate::report::{FailureReport, Stage, StageOutput};
use crate::sink::FlatRecord;

/// Listing letters in request order; `0` holds entries starting with a digit
pub const INDEX_LETTERS: [&str; 27] = [
    "0", "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q",
    "R", "S", "T", "U", "V", "W", "X", "Y", "Z",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChemicalRecord {
    #[serde(skip)]
    pub code: String,
    pub indx: Value,
    pub area: Value,
    pub description: Value,
    pub codes: Value,
    pub code1: Value,
    pub code2: Value,
    pub code3: Value,
    pub code4: Value,
    pub code5: Value,
    pub code6: Value,
}

impl ChemicalRecord {
    pub fn from_entry(code: String, entry: ChemicalEntry) -> Self {
        let field = |value: Option<Value>| value.unwrap_or(Value::Null);
        Self {
            code,
            indx: field(entry.indx),
            area: field(entry.area),
            description: field(entry.description),
            codes: field(entry.codes),
            code1: field(entry.code1),
            code2: field(entry.code2),
            code3: field(entry.code3),
            code4: field(entry.code4),
            code5: field(entry.code5),
            code6: field(entry.code6),
        }
    }
}

impl FlatRecord for ChemicalRecord {
    fn document_id(&self) -> String {
        self.code.clone()
    }
}

pub type ChemicalMap = BTreeMap<String, ChemicalRecord>;

pub const CHEMICAL_FIELDS: &[&str] = &[
    "indx",
    "area",
    "description",
    "codes",
    "code1",
    "code2",
    "code3",
    "code4",
    "code5",
    "code6",
];

pub fn chemical_mapping() -> Value {
    let mut properties = serde_json::Map::new();
    for field in CHEMICAL_FIELDS {
        let kind = if *field == "description" { "text" } else { "keyword" };
        properties.insert(field.to_string(), json!({"type": kind}));
    }
    json!({"mappings": {"properties": properties}})
}

/// Fold one letter's listing into `records`; a code already present keeps
/// its first record. Returns `(kept, duplicates)`.
pub fn merge_listing(records: &mut ChemicalMap, entries: Vec<ChemicalEntry>) -> (usize, usize) {
    let mut kept = 0;
    let mut duplicates = 0;
    for entry in entries {
        if !flag_set(&entry.final_node) {
            continue;
        }
        let code = value_text(&entry.code);
        if code.is_empty() {
            continue;
        }
        if records.contains_key(&code) {
            duplicates += 1;
            continue;
        }
        kept += 1;
        records.insert(code.clone(), ChemicalRecord::from_entry(code, entry));
    }
    (kept, duplicates)
}

pub struct ChemicalHarvester<'a> {
    api: &'a dyn ClassificationApi,
    config: &'a HarvestConfig,
    progress: ProgressBar,
}

impl<'a> ChemicalHarvester<'a> {
    pub fn new(api: &'a dyn ClassificationApi, config: &'a HarvestConfig) -> Self {
        Self {
            api,
            config,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub async fn harvest(&self) -> StageOutput<ChemicalMap> {
        let mut failures = FailureReport::new();
        let mut listings: BTreeMap<usize, Vec<ChemicalEntry>> = BTreeMap::new();

        self.progress.set_length(INDEX_LETTERS.len() as u64);
        self.progress.set_message("drug index letters");

        for_each_bounded(
            0..INDEX_LETTERS.len(),
            self.config.section_window,
            |i: usize| async move {
                let path = self.config.chemicals_path(INDEX_LETTERS[i]);
                fetch::<Vec<ChemicalEntry>>(self.api, &path).await
            },
            |i, result| {
                self.progress.inc(1);
                match result {
                    Ok(entries) => {
                        listings.insert(i, entries);
                    }
                    Err(e) => failures.record(Stage::Chemicals, INDEX_LETTERS[i], e),
                }
            },
        )
        .await;

        let mut records = ChemicalMap::new();
        let mut duplicates = 0;
        for (i, entries) in listings {
            let (kept, dupes) = merge_listing(&mut records, entries);
            debug!(letter = INDEX_LETTERS[i], kept, "Merged drug index letter");
            duplicates += dupes;
        }

        self.progress.finish_with_message("drug index done");
        info!(
            "Harvested {} chemical codes ({} duplicates skipped)",
            records.len(),
            duplicates
        );
        StageOutput::new(records, failures)
    }
}
