//! Combinatorial expansion of procedure codes.
//!
//! Every root operation has an axis table: one or more rows, each with four
//! label axes (body part, approach, device, qualifier). Every tuple of the
//! cartesian product of a row is a valid seven-character procedure code.

use indicatif::ProgressBar;
use serde::{Serialize, Serializer};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::eciemaps::{fetch, AxisLabel, AxisTableResponse, ClassificationApi};
use crate::error::{HarvestError, Result};
use crate::fanout::for_each_bounded;
use crate::report::{FailureReport, Stage, StageOutput};
use crate::taxonomy::{ProcedureClassMap, ProcedureClassRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Localization,
    Approach,
    Device,
    Qualifier,
}

impl AxisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AxisKind::Localization => "localization",
            AxisKind::Approach => "approach",
            AxisKind::Device => "device",
            AxisKind::Qualifier => "qualifier",
        }
    }
}

/// Structured combination key. The seven-character code is its `Display`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CombinationKey {
    pub type_code: String,
    pub localization: String,
    pub approach: String,
    pub device: String,
    pub qualifier: String,
}

impl fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.type_code, self.localization, self.approach, self.device, self.qualifier
        )
    }
}

impl Serialize for CombinationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The four label axes of one table row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisSet {
    pub localization: Vec<AxisLabel>,
    pub approach: Vec<AxisLabel>,
    pub device: Vec<AxisLabel>,
    pub qualifier: Vec<AxisLabel>,
}

impl AxisSet {
    pub fn axes(&self) -> [(AxisKind, &[AxisLabel]); 4] {
        [
            (AxisKind::Localization, self.localization.as_slice()),
            (AxisKind::Approach, self.approach.as_slice()),
            (AxisKind::Device, self.device.as_slice()),
            (AxisKind::Qualifier, self.qualifier.as_slice()),
        ]
    }

    /// Zero as soon as any axis is empty
    pub fn combination_count(&self) -> usize {
        self.localization.len() * self.approach.len() * self.device.len() * self.qualifier.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisTable {
    pub type_code: String,
    /// Operation definition, shared by every combination of the table
    pub definition: String,
    pub rows: Vec<AxisSet>,
}

impl AxisTable {
    pub fn from_response(type_code: &str, response: AxisTableResponse) -> Result<Self> {
        let table = response
            .pcs_table
            .into_iter()
            .next()
            .ok_or_else(|| HarvestError::shape(type_code, "empty pcsTable"))?;

        if let Some(index) = table.index.as_deref() {
            if index != type_code {
                warn!(requested = %type_code, returned = %index, "Axis table index mismatch");
            }
        }

        let definition = table
            .axis
            .last()
            .and_then(|axis| axis.definition.clone())
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(table.pcs_row.len());
        for (i, row) in table.pcs_row.into_iter().enumerate() {
            if row.axis.len() < 4 {
                return Err(HarvestError::shape(
                    type_code,
                    format!("row {} has {} axes, expected 4", i, row.axis.len()),
                ));
            }
            let mut axes = row.axis.into_iter().map(|axis| axis.label);
            rows.push(AxisSet {
                localization: axes.next().unwrap_or_default(),
                approach: axes.next().unwrap_or_default(),
                device: axes.next().unwrap_or_default(),
                qualifier: axes.next().unwrap_or_default(),
            });
        }

        Ok(Self {
            type_code: type_code.to_string(),
            definition,
            rows,
        })
    }

    /// Reject tables whose codes would not concatenate into unambiguous
    /// fixed-width procedure codes.
    pub fn validate_widths(&self, type_width: usize, axis_width: usize) -> Result<()> {
        let found = self.type_code.chars().count();
        if found != type_width {
            return Err(HarvestError::CodeWidth {
                type_code: self.type_code.clone(),
                axis: "type".to_string(),
                code: self.type_code.clone(),
                expected: type_width,
                found,
            });
        }
        for row in &self.rows {
            for (kind, labels) in row.axes() {
                for label in labels {
                    let found = label.code.chars().count();
                    if found != axis_width {
                        return Err(HarvestError::CodeWidth {
                            type_code: self.type_code.clone(),
                            axis: kind.as_str().to_string(),
                            code: label.code.clone(),
                            expected: axis_width,
                            found,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn combination_count(&self) -> usize {
        self.rows.iter().map(AxisSet::combination_count).sum()
    }
}

/// One synthesized procedure code with its inherited taxonomy labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinationRecord {
    #[serde(rename = "code")]
    pub key: CombinationKey,
    pub class_name: String,
    pub subclass_name: String,
    #[serde(rename = "procedure")]
    pub procedure_name: String,
    pub localization: String,
    pub approach: String,
    pub device: String,
    pub qualifier: String,
    pub definition: String,
}

pub type CombinationMap = BTreeMap<CombinationKey, CombinationRecord>;

/// Cartesian product of every row of `table`, labelled from `class`
pub fn combinations<'t>(
    class: &'t ProcedureClassRecord,
    table: &'t AxisTable,
) -> impl Iterator<Item = CombinationRecord> + 't {
    table.rows.iter().flat_map(move |row| {
        row.localization.iter().flat_map(move |loc| {
            row.approach.iter().flat_map(move |appr| {
                row.device.iter().flat_map(move |dev| {
                    row.qualifier.iter().map(move |qual| CombinationRecord {
                        key: CombinationKey {
                            type_code: class.type_code.clone(),
                            localization: loc.code.clone(),
                            approach: appr.code.clone(),
                            device: dev.code.clone(),
                            qualifier: qual.code.clone(),
                        },
                        class_name: class.class_name.clone(),
                        subclass_name: class.subclass_name.clone(),
                        procedure_name: class.procedure_name.clone(),
                        localization: loc.value.clone(),
                        approach: appr.value.clone(),
                        device: dev.value.clone(),
                        qualifier: qual.value.clone(),
                        definition: table.definition.clone(),
                    })
                })
            })
        })
    })
}

/// Insert every combination of `table`; returns (inserted, duplicates)
pub fn insert_combinations(
    map: &mut CombinationMap,
    class: &ProcedureClassRecord,
    table: &AxisTable,
) -> (usize, usize) {
    let mut inserted = 0;
    let mut duplicates = 0;
    for record in combinations(class, table) {
        match map.entry(record.key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                inserted += 1;
            }
            Entry::Occupied(_) => duplicates += 1,
        }
    }
    (inserted, duplicates)
}

pub struct Expander<'a> {
    api: &'a dyn ClassificationApi,
    config: &'a HarvestConfig,
    progress: ProgressBar,
}

impl<'a> Expander<'a> {
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

    async fn fetch_table(&self, type_code: String) -> Result<AxisTable> {
        let path = self.config.axis_table_path(&type_code);
        let response: AxisTableResponse = fetch(self.api, &path).await?;
        let table = AxisTable::from_response(&type_code, response)?;
        table.validate_widths(self.config.type_code_width, self.config.axis_code_width)?;
        Ok(table)
    }

    /// Fetch every class's axis table (bounded window) and expand it
    pub async fn expand(&self, classes: &ProcedureClassMap) -> StageOutput<CombinationMap> {
        let mut failures = FailureReport::new();
        let mut combos = CombinationMap::new();
        let mut duplicates = 0usize;

        self.progress.set_length(classes.len() as u64);
        self.progress.set_message("axis tables");

        for_each_bounded(
            classes.keys().cloned(),
            self.config.axis_window,
            |code| self.fetch_table(code),
            |code, result| {
                self.progress.inc(1);
                let table = match result {
                    Ok(table) => table,
                    Err(e) => {
                        failures.record(Stage::AxisTables, code, e);
                        return;
                    }
                };
                let Some(class) = classes.get(&code) else {
                    return;
                };
                let (inserted, dups) = insert_combinations(&mut combos, class, &table);
                duplicates += dups;
                if inserted == 0 && dups == 0 {
                    debug!(type_code = %code, "Axis table produced no combinations");
                }
            },
        )
        .await;

        self.progress.finish_with_message("axis tables done");
        if duplicates > 0 {
            warn!("Skipped {} duplicate combinations", duplicates);
        }
        info!(
            "Expanded {} procedure classes into {} combinations",
            classes.len(),
            combos.len()
        );
        StageOutput::new(combos, failures)
    }
}
