//! eCIEMaps API response types
//!
//! Only the fields the harvester reads are mapped. Everything is optional
//! on the wire: a missing field becomes an empty placeholder downstream
//! rather than a decode failure.
//!
//! Reference: https://www.eciemaps.sanidad.gob.es

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a taxonomy level (`tab/t1`, `tab/t2/{code}`, `tab/t3/{code}`)
#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyEntry {
    /// Code of the entry at this level
    #[serde(default)]
    pub t3: Option<String>,
    /// Display name
    #[serde(default)]
    pub d1: Option<String>,
}

/// Axis table wrapper (`lt/table/{code}`)
#[derive(Debug, Clone, Deserialize)]
pub struct AxisTableResponse {
    #[serde(rename = "pcsTable", default)]
    pub pcs_table: Vec<PcsTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PcsTable {
    #[serde(default)]
    pub index: Option<String>,
    /// Table-level axes (section, body system, operation). The last one
    /// carries the operation definition.
    #[serde(default)]
    pub axis: Vec<TableAxis>,
    #[serde(rename = "pcsRow", default)]
    pub pcs_row: Vec<PcsRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableAxis {
    #[serde(default)]
    pub definition: Option<String>,
}

/// One row of an axis table: four axes in fixed order
#[derive(Debug, Clone, Deserialize)]
pub struct PcsRow {
    #[serde(default)]
    pub axis: Vec<RowAxis>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowAxis {
    #[serde(default)]
    pub label: Vec<AxisLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisLabel {
    pub code: String,
    #[serde(default)]
    pub value: String,
}

impl AxisLabel {
    pub fn new(code: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            value: value.into(),
        }
    }
}

/// Procedure detail (`/ref/cie10pcs/{code}`)
#[derive(Debug, Clone, Deserialize)]
pub struct ProcedureDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "timesSelected", default)]
    pub times_selected: Option<Value>,
    #[serde(rename = "femalesOnly", default)]
    pub females_only: Option<Value>,
    #[serde(rename = "malesOnly", default)]
    pub males_only: Option<Value>,
}

/// Diagnosis section entry (`cie10mc/{edition}/lt/sec/{prefix}`)
#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosisEntry {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(rename = "type", default)]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub perinatal: Option<Value>,
    #[serde(default)]
    pub pediatric: Option<Value>,
    #[serde(default)]
    pub maternity: Option<Value>,
    #[serde(default)]
    pub adult: Option<Value>,
    #[serde(rename = "femalesOnly", default)]
    pub females_only: Option<Value>,
    #[serde(rename = "malesOnly", default)]
    pub males_only: Option<Value>,
    #[serde(rename = "poaExempt", default)]
    pub poa_exempt: Option<Value>,
    #[serde(rename = "noPrincipal", default)]
    pub no_principal: Option<Value>,
    #[serde(default)]
    pub vcdp: Option<Value>,
}

/// Drug index entry (`cie10mc/{edition}/ia/drugsByLetter/{letter}`)
#[derive(Debug, Clone, Deserialize)]
pub struct ChemicalEntry {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(rename = "finalNode", default)]
    pub final_node: Option<Value>,
    #[serde(default)]
    pub indx: Option<Value>,
    #[serde(default)]
    pub area: Option<Value>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub codes: Option<Value>,
    #[serde(default)]
    pub code1: Option<Value>,
    #[serde(default)]
    pub code2: Option<Value>,
    #[serde(default)]
    pub code3: Option<Value>,
    #[serde(default)]
    pub code4: Option<Value>,
    #[serde(default)]
    pub code5: Option<Value>,
    #[serde(default)]
    pub code6: Option<Value>,
}

/// A marker field counts as set when it is present and not null, `false`
/// or an empty string.
pub fn flag_set(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Render a loose JSON field as flat text; null and absent become empty
pub fn value_text(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Integer counters sometimes arrive as strings
pub fn value_i64(value: &Option<Value>) -> Option<i64> {
    match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flag_set() {
        assert!(!flag_set(&None));
        assert!(!flag_set(&Some(Value::Null)));
        assert!(!flag_set(&Some(json!(false))));
        assert!(!flag_set(&Some(json!(""))));
        assert!(flag_set(&Some(json!(true))));
        assert!(flag_set(&Some(json!("S"))));
        assert!(flag_set(&Some(json!(1))));
    }

    #[test]
    fn test_axis_table_tolerates_missing_fields() {
        let parsed: AxisTableResponse = serde_json::from_value(json!({
            "pcsTable": [{
                "index": "001",
                "axis": [{"pos": 1}, {"pos": 2, "definition": "Alter the route"}],
                "pcsRow": [{"axis": [{"label": [{"code": "6"}]}, {}, {"label": []}, {"label": []}]}]
            }]
        }))
        .unwrap();

        let table = &parsed.pcs_table[0];
        assert_eq!(table.index.as_deref(), Some("001"));
        assert_eq!(table.axis[1].definition.as_deref(), Some("Alter the route"));
        assert_eq!(table.pcs_row[0].axis[0].label[0], AxisLabel::new("6", ""));
        assert!(table.pcs_row[0].axis[1].label.is_empty());
    }

    #[test]
    fn test_value_helpers() {
        assert_eq!(value_text(&Some(json!("abc"))), "abc");
        assert_eq!(value_text(&Some(json!(12))), "12");
        assert_eq!(value_text(&None), "");
        assert_eq!(value_i64(&Some(json!(7))), Some(7));
        assert_eq!(value_i64(&Some(json!(" 8 "))), Some(8));
        assert_eq!(value_i64(&Some(json!("many"))), None);
        assert_eq!(value_i64(&Some(json!(12.0))), Some(12));
        assert_eq!(value_i64(&Some(json!(12.5))), None);
    }
}
