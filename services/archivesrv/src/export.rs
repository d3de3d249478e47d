//! CSV and JSON export of native points

use errors::{SimError, SimResult};
use serde::Serialize;

use crate::store::ArchivePoint;

pub const CSV_HEADER: &str = "timestamp,temperature,humidity,status";

/// Render `points` as CSV; offline values are empty fields
pub fn to_csv(points: &[ArchivePoint]) -> SimResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if points.is_empty() {
        writer.write_record(CSV_HEADER.split(','))?;
    }
    for point in points {
        writer.serialize(point)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| SimError::Serialization(format!("CSV flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| SimError::Serialization(e.to_string()))
}

/// Pretty JSON of any export document
pub fn to_json<T: Serialize>(document: &T) -> SimResult<String> {
    serde_json::to_string_pretty(document).map_err(|e| SimError::Serialization(e.to_string()))
}
