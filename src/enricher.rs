//! Detail enrichment of synthesized procedure codes
//!
//! One GET per code, split into round-robin chunks. Each chunk runs with its
//! own in-flight window and is fully drained before the next one starts, so
//! open connections stay bounded however many codes the expansion produced.

use indicatif::ProgressBar;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::config::HarvestConfig;
use crate::eciemaps::{
    fetch, flag_set, value_i64, value_text, ClassificationApi, ProcedureDetail,
};
use crate::error::{HarvestError, Result};
use crate::expander::{CombinationKey, CombinationMap, CombinationRecord};
use crate::fanout::{for_each_bounded, round_robin_chunks};
use crate::report::{FailureReport, Stage, StageOutput};
use crate::sink::FlatRecord;

/// Sex restriction of a code. Female-only wins when both flags are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gender {
    Female,
    Male,
    #[default]
    Unrestricted,
}

impl Gender {
    pub fn from_flags(
        females_only: &Option<serde_json::Value>,
        males_only: &Option<serde_json::Value>,
    ) -> Self {
        if flag_set(females_only) {
            Gender::Female
        } else if flag_set(males_only) {
            Gender::Male
        } else {
            Gender::Unrestricted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "F",
            Gender::Male => "M",
            Gender::Unrestricted => "",
        }
    }
}

impl Serialize for Gender {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Fields merged from the detail endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enrichment {
    pub description: String,
    #[serde(rename = "timesSelected")]
    pub times_selected: Option<i64>,
    pub gender: Gender,
}

impl Enrichment {
    pub fn from_detail(detail: &ProcedureDetail) -> Self {
        let times_selected = value_i64(&detail.times_selected);
        if times_selected.is_none() && flag_set(&detail.times_selected) {
            debug!(
                code = detail.code.as_deref().unwrap_or_default(),
                raw = %value_text(&detail.times_selected),
                "Ignoring non-integer timesSelected"
            );
        }
        Self {
            description: detail.description.clone().unwrap_or_default(),
            times_selected,
            gender: Gender::from_flags(&detail.females_only, &detail.males_only),
        }
    }
}

/// Exported procedure shape: combination plus optional detail fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub combination: CombinationRecord,
    #[serde(flatten)]
    pub enrichment: Option<Enrichment>,
}

impl EnrichedRecord {
    pub fn new(combination: CombinationRecord) -> Self {
        Self {
            combination,
            enrichment: None,
        }
    }

    pub fn code(&self) -> String {
        self.combination.key.to_string()
    }

    pub fn is_enriched(&self) -> bool {
        self.enrichment.is_some()
    }
}

impl FlatRecord for EnrichedRecord {
    fn document_id(&self) -> String {
        self.code()
    }
}

/// Export column order for procedure codes
pub const PROCEDURE_FIELDS: &[&str] = &[
    "code",
    "class_name",
    "subclass_name",
    "procedure",
    "localization",
    "approach",
    "device",
    "qualifier",
    "definition",
    "description",
    "timesSelected",
    "gender",
];

pub fn procedure_mapping() -> serde_json::Value {
    serde_json::json!({
        "mappings": {
            "properties": {
                "code": {"type": "keyword"},
                "class_name": {"type": "text"},
                "subclass_name": {"type": "text"},
                "procedure": {"type": "text"},
                "localization": {"type": "text"},
                "approach": {"type": "text"},
                "device": {"type": "text"},
                "qualifier": {"type": "text"},
                "definition": {"type": "text"},
                "description": {"type": "text"},
                "timesSelected": {"type": "integer"},
                "gender": {"type": "keyword"}
            }
        }
    })
}

pub type EnrichedMap = BTreeMap<CombinationKey, EnrichedRecord>;

/// Lookup from rendered code back to its structured key
pub type CodeIndex = HashMap<String, CombinationKey>;

pub fn code_index(records: &EnrichedMap) -> CodeIndex {
    records
        .keys()
        .map(|key| (key.to_string(), key.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// The response code is not one we synthesized; nothing was touched
    Unmatched,
    /// A previous response already enriched this record; kept as is
    AlreadyEnriched,
}

/// Merge one detail response into the record named by its `code` field.
/// Arrival order is irrelevant: the response body, not the request, picks
/// the record.
pub fn merge_detail(
    records: &mut EnrichedMap,
    index: &CodeIndex,
    detail: &ProcedureDetail,
) -> MergeOutcome {
    let Some(record) = detail
        .code
        .as_deref()
        .and_then(|code| index.get(code))
        .and_then(|key| records.get_mut(key))
    else {
        return MergeOutcome::Unmatched;
    };

    if record.enrichment.is_some() {
        return MergeOutcome::AlreadyEnriched;
    }
    record.enrichment = Some(Enrichment::from_detail(detail));
    MergeOutcome::Merged
}

pub struct Enricher<'a> {
    api: &'a dyn ClassificationApi,
    config: &'a HarvestConfig,
    progress: ProgressBar,
}

impl<'a> Enricher<'a> {
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

    async fn fetch_detail(&self, code: String) -> Result<ProcedureDetail> {
        let path = self.config.procedure_detail_path(&code);
        let detail: ProcedureDetail = fetch(self.api, &path).await?;
        if detail.code.is_none() {
            return Err(HarvestError::shape(code, "detail without code"));
        }
        Ok(detail)
    }

    pub async fn enrich(&self, combinations: CombinationMap) -> StageOutput<EnrichedMap> {
        let mut failures = FailureReport::new();
        let mut records: EnrichedMap = combinations
            .into_iter()
            .map(|(key, combination)| (key, EnrichedRecord::new(combination)))
            .collect();
        let index = code_index(&records);
        let codes: Vec<String> = records.keys().map(|key| key.to_string()).collect();
        let chunks = round_robin_chunks(&codes, self.config.detail_chunks);

        self.progress.set_length(codes.len() as u64);
        self.progress.set_message("procedure details");

        let mut merged = 0usize;
        let mut unmatched = 0usize;

        for (i, chunk) in chunks.into_iter().enumerate() {
            debug!(chunk = i, size = chunk.len(), "Dispatching detail chunk");
            for_each_bounded(
                chunk,
                self.config.detail_window,
                |code| self.fetch_detail(code),
                |code, result| {
                    self.progress.inc(1);
                    match result {
                        Ok(detail) => match merge_detail(&mut records, &index, &detail) {
                            MergeOutcome::Merged => merged += 1,
                            MergeOutcome::Unmatched => {
                                unmatched += 1;
                                failures.record(
                                    Stage::Details,
                                    code,
                                    format!(
                                        "response code {} matches no combination",
                                        detail.code.as_deref().unwrap_or_default()
                                    ),
                                );
                            }
                            MergeOutcome::AlreadyEnriched => {
                                debug!(code = %code, "Record already enriched")
                            }
                        },
                        Err(e) => failures.record(Stage::Details, code, e),
                    }
                },
            )
            .await;
        }

        self.progress.finish_with_message("procedure details done");
        info!(
            "Enriched {} of {} combinations ({} unmatched responses)",
            merged,
            records.len(),
            unmatched
        );
        StageOutput::new(records, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eciemaps::StaticApi;
    use serde_json::json;

    fn key(code: &str) -> CombinationKey {
        let chars: Vec<String> = code.chars().map(|c| c.to_string()).collect();
        CombinationKey {
            type_code: chars[..3].concat(),
            localization: chars[3].clone(),
            approach: chars[4].clone(),
            device: chars[5].clone(),
            qualifier: chars[6].clone(),
        }
    }

    fn combination(code: &str) -> CombinationRecord {
        CombinationRecord {
            key: key(code),
            class_name: "Medical and Surgical".to_string(),
            subclass_name: "Respiratory System".to_string(),
            procedure_name: "Bypass".to_string(),
            localization: "Trachea".to_string(),
            approach: "Open".to_string(),
            device: "No Device".to_string(),
            qualifier: "Cutaneous".to_string(),
            definition: "Altering the route".to_string(),
        }
    }

    fn detail(value: serde_json::Value) -> ProcedureDetail {
        serde_json::from_value(value).unwrap()
    }

    fn records(codes: &[&str]) -> EnrichedMap {
        codes
            .iter()
            .map(|code| (key(code), EnrichedRecord::new(combination(code))))
            .collect()
    }

    #[test]
    fn test_gender_precedence() {
        let females = detail(json!({"code": "x", "femalesOnly": "S"}));
        assert_eq!(
            Gender::from_flags(&females.females_only, &females.males_only),
            Gender::Female
        );

        let neither = detail(json!({"code": "x"}));
        assert_eq!(
            Gender::from_flags(&neither.females_only, &neither.males_only),
            Gender::Unrestricted
        );

        let both = detail(json!({"code": "x", "femalesOnly": true, "malesOnly": true}));
        assert_eq!(
            Gender::from_flags(&both.females_only, &both.males_only),
            Gender::Female
        );

        let males = detail(json!({"code": "x", "femalesOnly": null, "malesOnly": true}));
        assert_eq!(
            Gender::from_flags(&males.females_only, &males.males_only),
            Gender::Male
        );

        assert_eq!(Gender::Unrestricted.as_str(), "");
    }

    #[test]
    fn test_non_integer_times_selected_is_dropped() {
        let whole = detail(json!({"code": "x", "timesSelected": 12.0}));
        assert_eq!(Enrichment::from_detail(&whole).times_selected, Some(12));

        let text = detail(json!({"code": "x", "timesSelected": "n/a"}));
        assert_eq!(Enrichment::from_detail(&text).times_selected, None);
    }

    #[test]
    fn test_merge_by_response_code() {
        let mut records = records(&["0B110F4", "0B110Z4"]);
        let index = code_index(&records);

        let outcome = merge_detail(
            &mut records,
            &index,
            &detail(json!({
                "code": "0B110Z4",
                "description": "Bypass Trachea to Cutaneous, Open Approach",
                "timesSelected": 12,
                "malesOnly": true
            })),
        );

        assert_eq!(outcome, MergeOutcome::Merged);
        let enriched = records[&key("0B110Z4")].enrichment.as_ref().unwrap();
        assert_eq!(enriched.times_selected, Some(12));
        assert_eq!(enriched.gender, Gender::Male);
        assert!(!records[&key("0B110F4")].is_enriched());
    }

    #[test]
    fn test_unknown_code_is_dropped_without_mutation() {
        let mut records = records(&["0B110F4"]);
        let before = records.clone();
        let index = code_index(&records);

        let outcome = merge_detail(
            &mut records,
            &index,
            &detail(json!({"code": "ZZZZZZZ", "description": "stray"})),
        );

        assert_eq!(outcome, MergeOutcome::Unmatched);
        assert_eq!(records, before);
    }

    #[test]
    fn test_second_response_does_not_overwrite() {
        let mut records = records(&["0B110F4"]);
        let index = code_index(&records);
        let first = detail(json!({"code": "0B110F4", "description": "first"}));
        let second = detail(json!({"code": "0B110F4", "description": "second"}));

        assert_eq!(merge_detail(&mut records, &index, &first), MergeOutcome::Merged);
        assert_eq!(merge_detail(&mut records, &index, &second), MergeOutcome::AlreadyEnriched);
        assert_eq!(
            records[&key("0B110F4")].enrichment.as_ref().unwrap().description,
            "first"
        );
    }

    #[test]
    fn test_enriched_record_serializes_flat() {
        let mut record = EnrichedRecord::new(combination("0B110F4"));
        let doc = serde_json::to_value(&record).unwrap();
        assert_eq!(doc["code"], "0B110F4");
        assert_eq!(doc["procedure"], "Bypass");
        assert!(doc.get("description").is_none());

        record.enrichment = Some(Enrichment {
            description: "Bypass".to_string(),
            times_selected: None,
            gender: Gender::Female,
        });
        let doc = serde_json::to_value(&record).unwrap();
        assert_eq!(doc["gender"], "F");
        assert!(doc["timesSelected"].is_null());
        assert!(doc.get("times_selected").is_none());
        assert_eq!(record.document_id(), "0B110F4");
    }

    #[test]
    fn test_mapping_covers_every_field() {
        let mapping = procedure_mapping();
        let properties = mapping["mappings"]["properties"].as_object().unwrap();
        for field in PROCEDURE_FIELDS {
            assert!(properties.contains_key(*field), "{} missing", field);
        }
        assert_eq!(properties["code"]["type"], "keyword");
    }

    #[tokio::test]
    async fn test_enrich_chunks_and_failures() {
        let codes: Vec<String> = (0..9).map(|i| format!("0B110{}4", i)).collect();
        let mut api = StaticApi::new();
        for code in codes.iter().take(7) {
            api.insert(
                format!("/ref/cie10pcs/{}", code),
                json!({"code": code, "description": format!("desc {}", code), "timesSelected": 1}),
            );
        }
        // 0B11074 answers for a code we never synthesized, 0B11084 is not served
        api.insert("/ref/cie10pcs/0B11074", json!({"code": "0B1107X"}));

        let combinations: CombinationMap = codes
            .iter()
            .map(|code| (key(code), combination(code)))
            .collect();

        let config = HarvestConfig {
            detail_chunks: 4,
            detail_window: 2,
            ..HarvestConfig::default()
        };
        let output = Enricher::new(&api, &config).enrich(combinations).await;

        assert_eq!(output.value.len(), 9);
        assert_eq!(output.value.values().filter(|r| r.is_enriched()).count(), 7);
        assert_eq!(output.failures.count(Stage::Details), 2);

        // Chunk 0 (codes 0, 4, 8) is drained before chunk 1 starts
        let requested = api.requested();
        assert_eq!(requested.len(), 9);
        let chunk0 = requested[..3].to_vec();
        for i in [0, 4, 8] {
            assert!(chunk0.contains(&format!("/ref/cie10pcs/0B110{}4", i)));
        }
    }
}
