//! CIE-10-MC diagnosis harvest
//!
//! Sections are requested by two-character prefix (`A0` .. `Z9`). Only
//! descriptive entries are kept; a code listed more than once accumulates
//! its descriptions joined by `" | "`. Sections are merged in prefix order
//! once all have arrived, so the joined text does not depend on response
//! timing.

use indicatif::ProgressBar;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

use crate::config::HarvestConfig;
use crate::eciemaps::{fetch, flag_set, ClassificationApi, DiagnosisEntry};
use crate::enricher::Gender;
use crate::fanout::for_each_bounded;
use crate::report::{FailureReport, Stage, StageOutput};
use crate::sink::FlatRecord;

const KEPT_TYPES: [&str; 2] = ["desc", "inclusionTerm"];
const DESCRIPTION_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosisRecord {
    pub code: String,
    pub description: String,
    pub perinatal: bool,
    pub pediatric: bool,
    pub maternity: bool,
    pub adult: bool,
    #[serde(rename = "poaExempt")]
    pub poa_exempt: bool,
    #[serde(rename = "noPrincipal")]
    pub no_principal: bool,
    pub vcdp: bool,
    #[serde(rename = "exclusiveGender")]
    pub exclusive_gender: Gender,
}

impl DiagnosisRecord {
    pub fn from_entry(code: String, entry: &DiagnosisEntry) -> Self {
        Self {
            code,
            description: entry.description.clone().unwrap_or_default(),
            perinatal: flag_set(&entry.perinatal),
            pediatric: flag_set(&entry.pediatric),
            maternity: flag_set(&entry.maternity),
            adult: flag_set(&entry.adult),
            poa_exempt: flag_set(&entry.poa_exempt),
            no_principal: flag_set(&entry.no_principal),
            vcdp: flag_set(&entry.vcdp),
            exclusive_gender: Gender::from_flags(&entry.females_only, &entry.males_only),
        }
    }

    fn append_description(&mut self, description: &str) {
        if description.is_empty() {
            return;
        }
        if self.description.is_empty() {
            self.description = description.to_string();
        } else {
            self.description.push_str(DESCRIPTION_SEPARATOR);
            self.description.push_str(description);
        }
    }
}

impl FlatRecord for DiagnosisRecord {
    fn document_id(&self) -> String {
        self.code.clone()
    }
}

pub type DiagnosisMap = BTreeMap<String, DiagnosisRecord>;

pub const DIAGNOSIS_FIELDS: &[&str] = &[
    "code",
    "description",
    "perinatal",
    "pediatric",
    "maternity",
    "adult",
    "poaExempt",
    "noPrincipal",
    "vcdp",
    "exclusiveGender",
];

pub fn diagnosis_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "code": {"type": "keyword"},
                "description": {"type": "text"},
                "perinatal": {"type": "boolean"},
                "pediatric": {"type": "boolean"},
                "maternity": {"type": "boolean"},
                "adult": {"type": "boolean"},
                "poaExempt": {"type": "boolean"},
                "noPrincipal": {"type": "boolean"},
                "vcdp": {"type": "boolean"},
                "exclusiveGender": {"type": "keyword"}
            }
        }
    })
}

/// `A0`, `A1`, .. `Z9`
pub fn section_prefixes() -> Vec<String> {
    ('A'..='Z')
        .flat_map(|letter| (0..10).map(move |digit| format!("{}{}", letter, digit)))
        .collect()
}

/// Fold one section's entries into `records`. Returns how many entries were
/// kept.
pub fn merge_section(records: &mut DiagnosisMap, entries: &[DiagnosisEntry]) -> usize {
    let mut kept = 0;
    for entry in entries {
        let keep = entry
            .entry_type
            .as_deref()
            .map(|t| KEPT_TYPES.contains(&t))
            .unwrap_or(false);
        let Some(code) = entry.code.as_deref().filter(|_| keep) else {
            continue;
        };
        kept += 1;
        match records.get_mut(code) {
            Some(existing) => {
                existing.append_description(entry.description.as_deref().unwrap_or_default())
            }
            None => {
                records.insert(
                    code.to_string(),
                    DiagnosisRecord::from_entry(code.to_string(), entry),
                );
            }
        }
    }
    kept
}

pub struct DiagnosisHarvester<'a> {
    api: &'a dyn ClassificationApi,
    config: &'a HarvestConfig,
    progress: ProgressBar,
}

impl<'a> DiagnosisHarvester<'a> {
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

    pub async fn harvest(&self) -> StageOutput<DiagnosisMap> {
        self.harvest_prefixes(section_prefixes()).await
    }

    pub async fn harvest_prefixes(&self, prefixes: Vec<String>) -> StageOutput<DiagnosisMap> {
        let mut failures = FailureReport::new();
        let mut sections: BTreeMap<String, Vec<DiagnosisEntry>> = BTreeMap::new();

        self.progress.set_length(prefixes.len() as u64);
        self.progress.set_message("diagnosis sections");

        for_each_bounded(
            prefixes,
            self.config.section_window,
            |prefix: String| async move {
                let path = self.config.diagnosis_section_path(&prefix);
                fetch::<Vec<DiagnosisEntry>>(self.api, &path).await
            },
            |prefix, result| {
                self.progress.inc(1);
                match result {
                    Ok(entries) => {
                        sections.insert(prefix, entries);
                    }
                    Err(e) => failures.record(Stage::Diagnoses, prefix, e),
                }
            },
        )
        .await;

        let mut records = DiagnosisMap::new();
        for entries in sections.values() {
            merge_section(&mut records, entries);
        }

        self.progress.finish_with_message("diagnosis sections done");
        info!(
            "Harvested {} diagnosis codes from {} sections",
            records.len(),
            sections.len()
        );
        StageOutput::new(records, failures)
    }
}
