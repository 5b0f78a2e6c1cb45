//! Procedure taxonomy: sections -> body systems -> root operations.
//!
//! Each level is fetched sequentially, one GET per parent code. A failed
//! parent drops only its own descendants for this run.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::config::HarvestConfig;
use crate::eciemaps::{fetch, ClassificationApi, TaxonomyEntry};
use crate::report::{FailureReport, Stage, StageOutput};

/// Top level (section), e.g. `0` "Medical and Surgical"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeRecord {
    pub type_code: String,
    pub name: String,
}

/// Second level (body system)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtypeRecord {
    pub type_code: String,
    pub class_name: String,
    pub subclass_name: String,
}

/// Third level (root operation). Its code keys the axis table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcedureClassRecord {
    pub type_code: String,
    pub class_name: String,
    pub subclass_name: String,
    pub procedure_name: String,
}

pub type TypeMap = BTreeMap<String, TypeRecord>;
pub type SubtypeMap = BTreeMap<String, SubtypeRecord>;
pub type ProcedureClassMap = BTreeMap<String, ProcedureClassRecord>;

pub struct TaxonomyFetcher<'a> {
    api: &'a dyn ClassificationApi,
    config: &'a HarvestConfig,
}

impl<'a> TaxonomyFetcher<'a> {
    pub fn new(api: &'a dyn ClassificationApi, config: &'a HarvestConfig) -> Self {
        Self { api, config }
    }

    pub async fn fetch_types(&self) -> StageOutput<TypeMap> {
        let mut failures = FailureReport::new();
        let mut types = TypeMap::new();
        let path = self.config.types_path();

        match fetch::<Vec<TaxonomyEntry>>(self.api, &path).await {
            Ok(entries) => {
                for entry in entries {
                    let Some(code) = entry.t3 else {
                        failures.record(Stage::Types, path.as_str(), "entry without t3 code");
                        continue;
                    };
                    types.insert(
                        code.clone(),
                        TypeRecord {
                            type_code: code,
                            name: entry.d1.unwrap_or_default(),
                        },
                    );
                }
            }
            Err(e) => failures.record(Stage::Types, path.as_str(), e),
        }

        info!("Fetched {} procedure types", types.len());
        StageOutput::new(types, failures)
    }

    pub async fn fetch_subtypes(&self, types: &TypeMap) -> StageOutput<SubtypeMap> {
        let mut failures = FailureReport::new();
        let mut subtypes = SubtypeMap::new();

        for (code, parent) in types {
            let path = self.config.subtypes_path(code);
            let entries = match fetch::<Vec<TaxonomyEntry>>(self.api, &path).await {
                Ok(entries) => entries,
                Err(e) => {
                    failures.record(Stage::Subtypes, code.as_str(), e);
                    continue;
                }
            };
            for entry in entries {
                let Some(sub_code) = entry.t3 else {
                    failures.record(Stage::Subtypes, code.as_str(), "entry without t3 code");
                    continue;
                };
                subtypes.insert(
                    sub_code.clone(),
                    SubtypeRecord {
                        type_code: sub_code,
                        class_name: parent.name.clone(),
                        subclass_name: entry.d1.unwrap_or_default(),
                    },
                );
            }
        }

        info!("Fetched {} procedure subtypes", subtypes.len());
        StageOutput::new(subtypes, failures)
    }

    pub async fn fetch_procedure_classes(
        &self,
        subtypes: &SubtypeMap,
    ) -> StageOutput<ProcedureClassMap> {
        let mut failures = FailureReport::new();
        let mut classes = ProcedureClassMap::new();

        for (code, parent) in subtypes {
            let path = self.config.procedure_classes_path(code);
            let entries = match fetch::<Vec<TaxonomyEntry>>(self.api, &path).await {
                Ok(entries) => entries,
                Err(e) => {
                    failures.record(Stage::ProcedureClasses, code.as_str(), e);
                    continue;
                }
            };
            for entry in entries {
                let Some(class_code) = entry.t3 else {
                    failures.record(
                        Stage::ProcedureClasses,
                        code.as_str(),
                        "entry without t3 code",
                    );
                    continue;
                };
                classes.insert(
                    class_code.clone(),
                    ProcedureClassRecord {
                        type_code: class_code,
                        class_name: parent.class_name.clone(),
                        subclass_name: parent.subclass_name.clone(),
                        procedure_name: entry.d1.unwrap_or_default(),
                    },
                );
            }
        }

        info!("Fetched {} procedure classes", classes.len());
        StageOutput::new(classes, failures)
    }

    /// All three levels in order
    pub async fn fetch_all(&self) -> StageOutput<ProcedureClassMap> {
        let mut failures = FailureReport::new();
        let types = self.fetch_types().await.into_value(&mut failures);
        let subtypes = self.fetch_subtypes(&types).await.into_value(&mut failures);
        let classes = self
            .fetch_procedure_classes(&subtypes)
            .await
            .into_value(&mut failures);
        StageOutput::new(classes, failures)
    }
}
