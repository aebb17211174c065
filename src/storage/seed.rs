//! Seed files for in-memory stores.
//!
//! A seed file uses the remote collection's export format: one JSON object
//! mapping record id to stored body.

use std::collections::BTreeMap;
use std::path::Path;

use crate::record::{KeywordRecord, KeywordRecordBody, RecordId};
use crate::storage::traits::{KeywordStore, StorageError};

/// Parse a seed document into validated records, ordered by id.
///
/// # Errors
///
/// Returns `SerializationError` if the document is not an id-to-body object or
/// any body violates a record invariant.
pub fn parse_records(json: &str) -> Result<Vec<KeywordRecord>, StorageError> {
    let raw: BTreeMap<String, KeywordRecordBody> =
        serde_json::from_str(json).map_err(|e| StorageError::SerializationError(e.to_string()))?;

    raw.into_iter()
        .map(|(id, body)| {
            KeywordRecord::from_body(RecordId::from(id.clone()), body)
                .map_err(|e| StorageError::SerializationError(format!("record {id}: {e}")))
        })
        .collect()
}

/// Read and parse a seed file.
pub fn load_records_file(path: impl AsRef<Path>) -> Result<Vec<KeywordRecord>, StorageError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| StorageError::BackendError(format!("read {}: {e}", path.display())))?;
    parse_records(&json)
}

/// Create every record in `store`, returning how many were written.
pub fn seed_store(store: &dyn KeywordStore, records: Vec<KeywordRecord>) -> Result<usize, StorageError> {
    let count = records.len();
    for record in records {
        store.create(&record.id, record.to_body())?;
    }
    Ok(count)
}
