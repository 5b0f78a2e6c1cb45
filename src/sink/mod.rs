//! Output sinks: flat CSV files and a bulk-indexed search store.
//!
//! The two writes are independent; either can fail without the other
//! being rolled back.

pub mod bulk;
pub mod csv;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{HarvestError, Result};

/// A record that exports as one flat JSON object with a stable id
pub trait FlatRecord: Serialize {
    fn document_id(&self) -> String;

    fn to_document(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(HarvestError::shape(
                self.document_id(),
                format!("record serialized to {} instead of an object", other),
            )),
        }
    }
}

pub use self::bulk::{
    epoch_now, index_name, BulkIndexer, HttpIndexSink, IndexReport, IndexSink, MemoryIndexSink,
};
pub use self::csv::{write_csv, write_csv_file};
