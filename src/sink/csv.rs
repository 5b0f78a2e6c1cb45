//! CSV export with an explicit column order.

use serde_json::Value;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

use super::FlatRecord;
use crate::error::Result;

/// Write a header row of `fields` followed by one row per record. Fields a
/// record does not carry are written empty. Returns the data row count.
pub fn write_csv<'a, W, R, I>(out: W, records: I, fields: &[&str]) -> Result<usize>
where
    W: io::Write,
    R: FlatRecord + 'a,
    I: IntoIterator<Item = &'a R>,
{
    let mut writer = ::csv::Writer::from_writer(out);
    writer.write_record(fields)?;

    let mut rows = 0;
    for record in records {
        let document = record.to_document()?;
        let row: Vec<String> = fields.iter().map(|field| cell(document.get(*field))).collect();
        writer.write_record(&row)?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}

/// Write to `path` through a sibling temp file so a failed run never leaves
/// a truncated CSV behind.
pub fn write_csv_file<'a, R, I>(path: &Path, records: I, fields: &[&str]) -> Result<usize>
where
    R: FlatRecord + 'a,
    I: IntoIterator<Item = &'a R>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("export.csv");
    let tmp_path = path.with_file_name(format!("{}.tmp", file_name));

    let file = fs::File::create(&tmp_path)?;
    let rows = match write_csv(io::BufWriter::new(file), records, fields) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
    };
    fs::rename(&tmp_path, path)?;

    info!("Wrote {} rows to {}", rows, path.display());
    Ok(rows)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Row {
        code: String,
        flag: bool,
        count: Option<i64>,
    }

    impl FlatRecord for Row {
        fn document_id(&self) -> String {
            self.code.clone()
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row {
                code: "A00".to_string(),
                flag: true,
                count: Some(3),
            },
            Row {
                code: "A01, typhoid".to_string(),
                flag: false,
                count: None,
            },
        ]
    }

    #[test]
    fn test_columns_follow_field_order() {
        let mut out = Vec::new();
        let n = write_csv(&mut out, &rows(), &["count", "code", "missing", "flag"]).unwrap();

        assert_eq!(n, 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "count,code,missing,flag");
        assert_eq!(lines[1], "3,A00,,true");
        assert_eq!(lines[2], ",\"A01, typhoid\",,false");
    }

    #[test]
    fn test_header_only_when_empty() {
        let mut out = Vec::new();
        let empty: Vec<Row> = Vec::new();
        assert_eq!(write_csv(&mut out, &empty, &["code"]).unwrap(), 0);
        assert_eq!(String::from_utf8(out).unwrap(), "code\n");
    }

    #[test]
    fn test_file_write_creates_parent_and_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("codes.csv");

        assert_eq!(write_csv_file(&path, &rows(), &["code"]).unwrap(), 2);
        assert!(path.exists());
        assert!(!dir.path().join("out").join("codes.csv.tmp").exists());

        let mut reader = ::csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.records().count(), 2);
    }

    #[derive(Serialize)]
    struct Bare(String);

    impl FlatRecord for Bare {
        fn document_id(&self) -> String {
            self.0.clone()
        }
    }

    #[test]
    fn test_failed_write_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.csv");
        let records = vec![Bare("A00".to_string())];

        assert!(write_csv_file(&path, &records, &["code"]).is_err());
        assert!(!path.exists());
        assert!(!dir.path().join("codes.csv.tmp").exists());
    }
}
