//! Canned eCIEMaps payloads shared by the pipeline integration tests

#![allow(dead_code)]

use cie_harvest::StaticApi;
use serde_json::{json, Value};
use std::path::Path;

pub fn labels(pairs: &[(&str, &str)]) -> Value {
    Value::Array(
        pairs
            .iter()
            .map(|(code, value)| json!({"code": code, "value": value}))
            .collect(),
    )
}

/// Single-row axis table: localization, approach, device, qualifier
pub fn axis_table(index: &str, definition: &str, axes: [&[(&str, &str)]; 4]) -> Value {
    json!({
        "pcsTable": [{
            "index": index,
            "axis": [
                {"definition": null},
                {"definition": null},
                {"definition": definition}
            ],
            "pcsRow": [{
                "axis": axes.iter().map(|pairs| json!({"label": labels(pairs)})).collect::<Vec<_>>()
            }]
        }]
    })
}

/// Two procedure classes under one type:
/// `0B1` expands to 2 x 1 x 1 x 1 codes, `0D5` to 1 x 2 x 1 x 1.
pub fn procedure_api() -> StaticApi {
    StaticApi::new()
        .with(
            "/cie10pcs/2024/tab/t1",
            json!([{"t3": "0", "d1": "Médico-Quirúrgica"}]),
        )
        .with(
            "/cie10pcs/2024/tab/t2/0",
            json!([
                {"t3": "0B", "d1": "Aparato Respiratorio"},
                {"t3": "0D", "d1": "Aparato Digestivo"}
            ]),
        )
        .with(
            "/cie10pcs/2024/tab/t3/0B",
            json!([{"t3": "0B1", "d1": "Derivación"}]),
        )
        .with(
            "/cie10pcs/2024/tab/t3/0D",
            json!([{"t3": "0D5", "d1": "Destrucción"}]),
        )
        .with(
            "/cie10pcs/2024/lt/table/0B1",
            axis_table(
                "0B1",
                "Alterar la ruta de paso del contenido de una estructura tubular",
                [
                    &[("1", "Tráquea"), ("2", "Carina")],
                    &[("0", "Abierto")],
                    &[("Z", "Sin Dispositivo")],
                    &[("4", "Cutáneo")],
                ],
            ),
        )
        .with(
            "/cie10pcs/2024/lt/table/0D5",
            axis_table(
                "0D5",
                "Erradicación física de toda o parte de una estructura corporal",
                [
                    &[("8", "Intestino Delgado")],
                    &[("0", "Abierto"), ("4", "Endoscópico Percutáneo")],
                    &[("Z", "Sin Dispositivo")],
                    &[("Z", "Sin Calificador")],
                ],
            ),
        )
        // One matching detail per class
        .with(
            "/ref/cie10pcs/0B110Z4",
            json!({
                "code": "0B110Z4",
                "description": "Derivación Tráquea a Cutáneo, Abordaje Abierto",
                "timesSelected": 42,
                "femalesOnly": null,
                "malesOnly": null
            }),
        )
        .with(
            "/ref/cie10pcs/0D580ZZ",
            json!({
                "code": "0D580ZZ",
                "description": "Destrucción de Intestino Delgado, Abordaje Abierto",
                "timesSelected": "7",
                "femalesOnly": "S"
            }),
        )
        // Two answers naming codes nobody asked for
        .with(
            "/ref/cie10pcs/0B120Z4",
            json!({"code": "0B1ZZZZ", "description": "desconocido"}),
        )
        .with(
            "/ref/cie10pcs/0D584ZZ",
            json!({"code": "0D5999Z", "description": "desconocido"}),
        )
}

pub fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).expect("open csv");
    let headers = reader
        .headers()
        .expect("csv headers")
        .iter()
        .map(String::from)
        .collect();
    let rows = reader
        .records()
        .map(|record| {
            record
                .expect("csv record")
                .iter()
                .map(String::from)
                .collect()
        })
        .collect();
    (headers, rows)
}
