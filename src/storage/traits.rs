//! Abstract storage traits for keywatch.
//!
//! These traits describe the remote record store at its interface boundary:
//! a keyed collection of keyword records with a change feed, the deleted-records
//! log, and a keyed collection of ping timestamps. By using traits, we enable:
//! - In-memory backends for tests, simulations, and the bundled binary
//! - Remote backends (hosted realtime databases) supplied by the embedder

use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{KeywordRecord, KeywordRecordBody, PingRecord, RecordId, Tombstone};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record not found.
    #[error("Keyword record not found: {0}")]
    RecordNotFound(RecordId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Store or feed connection is down.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// The remote call did not finish in time.
    #[error("Storage call timed out after {duration_ms}ms")]
    Timeout {
        /// Deadline that was exceeded.
        duration_ms: u64,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// One raw delta from the change feed.
///
/// `path` is `/` for a whole-collection replay, `/<id>` for a record-level
/// write, or `/<id>/<field>` for a field-level write. `data` is the written
/// value, absent for deletions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    /// Location of the write.
    pub path: String,
    /// Written value; `None` for deletions.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl FeedMessage {
    /// Creates a feed message.
    #[must_use]
    pub fn new(path: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }
}

/// Outcome of waiting on a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedRecv {
    /// A delta arrived.
    Message(FeedMessage),
    /// Nothing arrived before the timeout.
    Idle,
    /// The feed connection was closed by the store.
    Closed,
}

/// Subscription handle for the keyword change feed.
///
/// Deltas are delivered in write order. The handle becomes `Closed` once the
/// store drops the subscription (connection loss).
#[derive(Debug)]
pub struct ChangeFeed {
    rx: Receiver<FeedMessage>,
}

impl ChangeFeed {
    /// Wraps the receiving end of a subscription.
    #[must_use]
    pub fn new(rx: Receiver<FeedMessage>) -> Self {
        Self { rx }
    }

    /// Wait up to `timeout` for the next delta.
    pub fn recv_timeout(&self, timeout: Duration) -> FeedRecv {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => FeedRecv::Message(msg),
            Err(RecvTimeoutError::Timeout) => FeedRecv::Idle,
            Err(RecvTimeoutError::Disconnected) => FeedRecv::Closed,
        }
    }

    /// Underlying receiver, for use in `select!`.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<FeedMessage> {
        &self.rx
    }
}

/// Storage trait for keyword records.
///
/// # Safety Considerations
/// - Every mutation must be reflected on the change feed, in mutation order
/// - Implementations should handle concurrent access safely
pub trait KeywordStore: Send + Sync {
    /// Read every current record.
    fn get_all(&self) -> Result<Vec<KeywordRecord>, StorageError>;

    /// Get a record by id.
    fn get(&self, id: &RecordId) -> Result<Option<KeywordRecord>, StorageError>;

    /// Create a record under a caller-generated id. Returns error if the id exists.
    fn create(&self, id: &RecordId, body: KeywordRecordBody) -> Result<(), StorageError>;

    /// Overwrite the cooldown of an existing record.
    fn set_delay(&self, id: &RecordId, delay_seconds: u64) -> Result<(), StorageError>;

    /// Delete a record and append its tombstone to the deleted-records log.
    ///
    /// # Errors
    /// - `RecordNotFound`: If no record has this id
    fn delete(&self, id: &RecordId, deleted_at: DateTime<Utc>) -> Result<Tombstone, StorageError>;

    /// The deleted-records log, in append order.
    fn deleted_log(&self) -> Result<Vec<Tombstone>, StorageError>;

    /// Subscribe to the change feed.
    ///
    /// The first delta replays the whole collection at path `/`.
    fn subscribe(&self) -> Result<ChangeFeed, StorageError>;
}

/// Storage trait for ping history.
///
/// At most one `PingRecord` exists per keyword-record id.
pub trait PingStore: Send + Sync {
    /// Read every ping record.
    fn get_all_pings(&self) -> Result<Vec<PingRecord>, StorageError>;

    /// Get the ping record for a keyword record, if any.
    fn get_ping(&self, id: &RecordId) -> Result<Option<PingRecord>, StorageError>;

    /// Create or update the ping record for a keyword record.
    fn upsert_ping(&self, id: &RecordId, pinged_at: DateTime<Utc>) -> Result<(), StorageError>;
}
