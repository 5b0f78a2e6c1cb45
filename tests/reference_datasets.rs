//! Diagnosis and chemical harvests written to CSV and the index

mod helpers;

use cie_harvest::chemicals::CHEMICAL_FIELDS;
use cie_harvest::diagnoses::DIAGNOSIS_FIELDS;
use cie_harvest::pipeline::{ChemicalPipeline, DiagnosisPipeline};
use cie_harvest::{Harvest, HarvestConfig, MemoryIndexSink, RunOptions, StaticApi, Stage};
use serde_json::json;

fn served_sections() -> StaticApi {
    let mut api = StaticApi::new();
    for prefix in cie_harvest::diagnoses::section_prefixes() {
        api.insert(format!("/cie10mc/2024/lt/sec/{}", prefix), json!([]));
    }
    api.insert(
        "/cie10mc/2024/lt/sec/N4",
        json!([
            {
                "code": "N40", "type": "desc", "description": "Hiperplasia de próstata",
                "malesOnly": "S", "adult": "S"
            },
            {"code": "N40", "type": "excludes1", "description": "neoplasia benigna"},
            {"code": "N40", "type": "inclusionTerm", "description": "Adenofibroma de próstata"}
        ]),
    );
    api
}

#[tokio::test]
async fn test_diagnoses_csv_has_ten_columns() {
    let api = served_sections();
    let sink = MemoryIndexSink::new();
    let config = HarvestConfig::default();
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("diagnoses.csv");
    let options = RunOptions {
        csv_path: Some(csv_path.clone()),
        ..RunOptions::default()
    };

    let report = DiagnosisPipeline::new(Harvest::new(&api, &sink, &config, options))
        .run()
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    let (headers, rows) = helpers::read_csv(&csv_path);
    assert_eq!(headers, DIAGNOSIS_FIELDS);
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0],
        vec![
            "N40",
            "Hiperplasia de próstata | Adenofibroma de próstata",
            "false",
            "false",
            "false",
            "true",
            "false",
            "false",
            "false",
            "M",
        ]
    );

    let index = report.index.unwrap();
    assert!(index.index.starts_with("diagnoses-"));
    assert_eq!(index.documents, 1);
}

#[tokio::test]
async fn test_chemicals_skip_inner_nodes_and_missing_letters() {
    let api = StaticApi::new()
        .with(
            "/cie10mc/2024/ia/drugsByLetter/M",
            json!([
                {"code": 500, "finalNode": false, "description": "Metales"},
                {
                    "code": 501, "finalNode": true, "indx": "M", "area": "Envenenamiento",
                    "description": "Mercurio", "codes": "T56.1X",
                    "code1": "T56.1X1", "code2": "T56.1X2"
                }
            ]),
        )
        .fail("/cie10mc/2024/ia/drugsByLetter/Q", 503);
    let sink = MemoryIndexSink::new();
    let config = HarvestConfig::default();
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("chemicals.csv");
    let options = RunOptions {
        csv_path: Some(csv_path.clone()),
        ..RunOptions::default()
    };

    let report = ChemicalPipeline::new(Harvest::new(&api, &sink, &config, options))
        .run()
        .await
        .unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.failures.count(Stage::Chemicals), 26);

    let (headers, rows) = helpers::read_csv(&csv_path);
    assert_eq!(headers, CHEMICAL_FIELDS);
    assert_eq!(
        rows[0],
        vec!["M", "Envenenamiento", "Mercurio", "T56.1X", "T56.1X1", "T56.1X2", "", "", "", ""]
    );

    let bulk = &sink.bulks()[0];
    assert!(bulk.contains(r#""_id":"501""#));
    assert_eq!(bulk.lines().count(), 2);
}
