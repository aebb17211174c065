//! Bounded-time wrapper for remote stores.
//!
//! Remote calls have no deadline of their own. `Deadline` runs each call on a
//! short-lived helper thread and gives up after the configured timeout,
//! reporting `StorageError::Timeout`. A timed-out call is detached, not
//! cancelled; its eventual result is discarded.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::record::{KeywordRecord, KeywordRecordBody, PingRecord, RecordId, Tombstone};
use crate::storage::traits::{ChangeFeed, KeywordStore, PingStore, StorageError};

/// Store wrapper that bounds every call by a timeout.
#[derive(Debug)]
pub struct Deadline<S: ?Sized> {
    inner: Arc<S>,
    timeout: Duration,
}

impl<S: ?Sized> Deadline<S> {
    /// Wraps `inner`, bounding each call by `timeout`.
    #[must_use]
    pub fn new(inner: Arc<S>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The configured per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn with_deadline<T, F>(timeout: Duration, op: &'static str, f: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name(format!("keywatch-{op}"))
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| StorageError::BackendError(format!("failed to spawn {op} call: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(op, timeout_ms = timeout.as_millis() as u64, "remote store call timed out");
            Err(StorageError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(StorageError::BackendError(format!(
            "{op} call terminated without a result"
        ))),
    }
}

impl<S> KeywordStore for Deadline<S>
where
    S: KeywordStore + ?Sized + 'static,
{
    fn get_all(&self) -> Result<Vec<KeywordRecord>, StorageError> {
        let inner = Arc::clone(&self.inner);
        with_deadline(self.timeout, "get_all", move || inner.get_all())
    }

    fn get(&self, id: &RecordId) -> Result<Option<KeywordRecord>, StorageError> {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        with_deadline(self.timeout, "get", move || inner.get(&id))
    }

    fn create(&self, id: &RecordId, body: KeywordRecordBody) -> Result<(), StorageError> {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        with_deadline(self.timeout, "create", move || inner.create(&id, body))
    }

    fn set_delay(&self, id: &RecordId, delay_seconds: u64) -> Result<(), StorageError> {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        with_deadline(self.timeout, "set_delay", move || inner.set_delay(&id, delay_seconds))
    }

    fn delete(&self, id: &RecordId, deleted_at: DateTime<Utc>) -> Result<Tombstone, StorageError> {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        with_deadline(self.timeout, "delete", move || inner.delete(&id, deleted_at))
    }

    fn deleted_log(&self) -> Result<Vec<Tombstone>, StorageError> {
        let inner = Arc::clone(&self.inner);
        with_deadline(self.timeout, "deleted_log", move || inner.deleted_log())
    }

    fn subscribe(&self) -> Result<ChangeFeed, StorageError> {
        let inner = Arc::clone(&self.inner);
        with_deadline(self.timeout, "subscribe", move || inner.subscribe())
    }
}

impl<S> PingStore for Deadline<S>
where
    S: PingStore + ?Sized + 'static,
{
    fn get_all_pings(&self) -> Result<Vec<PingRecord>, StorageError> {
        let inner = Arc::clone(&self.inner);
        with_deadline(self.timeout, "get_all_pings", move || inner.get_all_pings())
    }

    fn get_ping(&self, id: &RecordId) -> Result<Option<PingRecord>, StorageError> {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        with_deadline(self.timeout, "get_ping", move || inner.get_ping(&id))
    }

    fn upsert_ping(&self, id: &RecordId, pinged_at: DateTime<Utc>) -> Result<(), StorageError> {
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        with_deadline(self.timeout, "upsert_ping", move || inner.upsert_ping(&id, pinged_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::memory::InMemoryPingStore;

    struct SlowPings;

    impl PingStore for SlowPings {
        fn get_all_pings(&self) -> Result<Vec<PingRecord>, StorageError> {
            thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }

        fn get_ping(&self, _id: &RecordId) -> Result<Option<PingRecord>, StorageError> {
            thread::sleep(Duration::from_millis(500));
            Ok(None)
        }

        fn upsert_ping(&self, _id: &RecordId, _at: DateTime<Utc>) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn slow_call_times_out() {
        let store = Deadline::new(Arc::new(SlowPings), Duration::from_millis(20));
        let err = store.get_ping(&RecordId::from("k1")).unwrap_err();
        assert!(matches!(err, StorageError::Timeout { duration_ms: 20 }));
        assert!(store.upsert_ping(&RecordId::from("k1"), Utc::now()).is_ok());
    }

    #[test]
    fn fast_call_passes_through() {
        let inner: Arc<dyn PingStore> = Arc::new(InMemoryPingStore::new());
        let store = Deadline::new(inner, Duration::from_secs(1));
        let id = RecordId::from("k1");
        let now = Utc::now();
        store.upsert_ping(&id, now).unwrap();
        assert_eq!(store.get_ping(&id).unwrap().unwrap().pinged_at, now);
    }
}
