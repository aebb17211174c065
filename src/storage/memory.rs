//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation of the
//! change feed contract: every mutation is published to subscribers while the state
//! lock is held, so feed order always equals mutation order.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Sender};

use crate::record::{KeywordRecord, KeywordRecordBody, PingRecord, RecordId, Tombstone};
use crate::storage::traits::{ChangeFeed, FeedMessage, KeywordStore, PingStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn unavailable(context: &'static str) -> StorageError {
    StorageError::Unavailable(format!("store offline ({context})"))
}

fn body_value(body: &KeywordRecordBody) -> Result<serde_json::Value, StorageError> {
    serde_json::to_value(body).map_err(|e| StorageError::SerializationError(e.to_string()))
}

#[derive(Debug)]
struct KeywordState {
    records: BTreeMap<RecordId, KeywordRecord>,
    tombstones: Vec<Tombstone>,
    subscribers: Vec<Sender<FeedMessage>>,
    available: bool,
}

impl Default for KeywordState {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            tombstones: Vec::new(),
            subscribers: Vec::new(),
            available: true,
        }
    }
}

impl KeywordState {
    fn publish(&mut self, msg: &FeedMessage) {
        // Disconnected subscribers are pruned on the next publish.
        self.subscribers.retain(|tx| tx.send(msg.clone()).is_ok());
    }

    fn replay(&self) -> Result<FeedMessage, StorageError> {
        if self.records.is_empty() {
            return Ok(FeedMessage::new("/", None));
        }
        let mut all = serde_json::Map::new();
        for (id, record) in &self.records {
            all.insert(id.to_string(), body_value(&record.to_body())?);
        }
        Ok(FeedMessage::new("/", Some(serde_json::Value::Object(all))))
    }
}

/// Thread-safe in-memory keyword record store with a change feed.
#[derive(Debug, Default)]
pub struct InMemoryKeywordStore {
    state: RwLock<KeywordState>,
}

impl InMemoryKeywordStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated availability. While offline every call fails with
    /// `StorageError::Unavailable` and going offline closes all feeds.
    pub fn set_available(&self, available: bool) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("keywords.set_available"))?;
        state.available = available;
        if !available {
            state.subscribers.clear();
        }
        Ok(())
    }

    /// Drop every feed subscription, simulating a connection drop.
    pub fn disconnect_subscribers(&self) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("keywords.disconnect_subscribers"))?;
        state.subscribers.clear();
        Ok(())
    }

    /// Number of live feed subscriptions.
    pub fn subscriber_count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("keywords.subscriber_count"))?;
        Ok(state.subscribers.len())
    }

    /// Publish a raw delta to every subscriber without touching stored state.
    ///
    /// Used to exercise feed consumers with hand-built payloads.
    pub fn inject(&self, msg: FeedMessage) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("keywords.inject"))?;
        state.publish(&msg);
        Ok(())
    }
}

impl KeywordStore for InMemoryKeywordStore {
    fn get_all(&self) -> Result<Vec<KeywordRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("keywords.get_all"))?;
        if !state.available {
            return Err(unavailable("keywords.get_all"));
        }
        Ok(state.records.values().cloned().collect())
    }

    fn get(&self, id: &RecordId) -> Result<Option<KeywordRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("keywords.get"))?;
        if !state.available {
            return Err(unavailable("keywords.get"));
        }
        Ok(state.records.get(id).cloned())
    }

    fn create(&self, id: &RecordId, body: KeywordRecordBody) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("keywords.create"))?;
        if !state.available {
            return Err(unavailable("keywords.create"));
        }
        if state.records.contains_key(id) || state.tombstones.iter().any(|t| &t.id == id) {
            return Err(StorageError::DuplicateKey(id.to_string()));
        }

        let data = body_value(&body)?;
        let record = KeywordRecord::from_body(id.clone(), body)
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        state.records.insert(id.clone(), record);
        state.publish(&FeedMessage::new(format!("/{id}"), Some(data)));
        Ok(())
    }

    fn set_delay(&self, id: &RecordId, delay_seconds: u64) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("keywords.set_delay"))?;
        if !state.available {
            return Err(unavailable("keywords.set_delay"));
        }
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| StorageError::RecordNotFound(id.clone()))?;
        record.delay_seconds = delay_seconds;
        state.publish(&FeedMessage::new(
            format!("/{id}/delay"),
            Some(serde_json::Value::from(delay_seconds)),
        ));
        Ok(())
    }

    fn delete(&self, id: &RecordId, deleted_at: DateTime<Utc>) -> Result<Tombstone, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("keywords.delete"))?;
        if !state.available {
            return Err(unavailable("keywords.delete"));
        }
        let record = state
            .records
            .remove(id)
            .ok_or_else(|| StorageError::RecordNotFound(id.clone()))?;

        let tombstone = Tombstone {
            id: id.clone(),
            keywords: record.keywords_text(),
            deleted_at,
        };
        state.tombstones.push(tombstone.clone());
        state.publish(&FeedMessage::new(format!("/{id}"), None));
        Ok(tombstone)
    }

    fn deleted_log(&self) -> Result<Vec<Tombstone>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("keywords.deleted_log"))?;
        if !state.available {
            return Err(unavailable("keywords.deleted_log"));
        }
        Ok(state.tombstones.clone())
    }

    fn subscribe(&self) -> Result<ChangeFeed, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("keywords.subscribe"))?;
        if !state.available {
            return Err(unavailable("keywords.subscribe"));
        }
        let (tx, rx) = unbounded();
        let replay = state.replay()?;
        tx.send(replay)
            .map_err(|_| StorageError::BackendError("feed receiver dropped".to_string()))?;
        state.subscribers.push(tx);
        Ok(ChangeFeed::new(rx))
    }
}

#[derive(Debug)]
struct PingState {
    by_record: HashMap<RecordId, PingRecord>,
    available: bool,
}

impl Default for PingState {
    fn default() -> Self {
        Self {
            by_record: HashMap::new(),
            available: true,
        }
    }
}

/// Thread-safe in-memory ping history store.
#[derive(Debug, Default)]
pub struct InMemoryPingStore {
    state: RwLock<PingState>,
}

impl InMemoryPingStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("pings.set_available"))?;
        state.available = available;
        Ok(())
    }
}

impl PingStore for InMemoryPingStore {
    fn get_all_pings(&self) -> Result<Vec<PingRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("pings.get_all"))?;
        if !state.available {
            return Err(unavailable("pings.get_all"));
        }
        let mut out: Vec<PingRecord> = state.by_record.values().cloned().collect();
        out.sort_by(|a, b| a.keyword_record_id.cmp(&b.keyword_record_id));
        Ok(out)
    }

    fn get_ping(&self, id: &RecordId) -> Result<Option<PingRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("pings.get"))?;
        if !state.available {
            return Err(unavailable("pings.get"));
        }
        Ok(state.by_record.get(id).cloned())
    }

    fn upsert_ping(&self, id: &RecordId, pinged_at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("pings.upsert"))?;
        if !state.available {
            return Err(unavailable("pings.upsert"));
        }
        state.by_record.insert(
            id.clone(),
            PingRecord {
                keyword_record_id: id.clone(),
                pinged_at,
            },
        );
        Ok(())
    }
}

/// Convenience bundle providing both in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Keyword record store.
    pub keywords: InMemoryKeywordStore,
    /// Ping history store.
    pub pings: InMemoryPingStore,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::record::ChannelRef;
    use crate::storage::traits::FeedRecv;

    fn body(keywords: &[&str], delay: u64) -> KeywordRecordBody {
        KeywordRecordBody {
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            channel: ChannelRef::new("c1", "alerts"),
            delay,
        }
    }

    fn next(feed: &ChangeFeed) -> FeedMessage {
        match feed.recv_timeout(Duration::from_millis(200)) {
            FeedRecv::Message(msg) => msg,
            other => panic!("expected feed message, got {other:?}"),
        }
    }

    #[test]
    fn create_get_delete_and_tombstone() {
        let store = InMemoryKeywordStore::new();
        let id = RecordId::from("k1");
        store.create(&id, body(&["urgent", "deploy"], 60)).unwrap();

        let got = store.get(&id).unwrap().unwrap();
        assert_eq!(got.keywords_text(), "urgent deploy");

        let now = Utc::now();
        let tombstone = store.delete(&id, now).unwrap();
        assert_eq!(tombstone.keywords, "urgent deploy");
        assert_eq!(tombstone.deleted_at, now);
        assert!(store.get(&id).unwrap().is_none());
        assert_eq!(store.deleted_log().unwrap(), vec![tombstone]);

        assert!(matches!(
            store.delete(&id, now),
            Err(StorageError::RecordNotFound(_))
        ));
    }

    #[test]
    fn deleted_id_cannot_be_recreated() {
        let store = InMemoryKeywordStore::new();
        let id = RecordId::from("k1");
        store.create(&id, body(&["a"], 0)).unwrap();
        store.delete(&id, Utc::now()).unwrap();
        assert!(matches!(
            store.create(&id, body(&["a"], 0)),
            Err(StorageError::DuplicateKey(_))
        ));
    }

    #[test]
    fn feed_replays_then_streams_in_order() {
        let store = InMemoryKeywordStore::new();
        let feed = store.subscribe().unwrap();
        assert_eq!(next(&feed), FeedMessage::new("/", None));

        let id = RecordId::from("k1");
        store.create(&id, body(&["urgent"], 60)).unwrap();
        store.set_delay(&id, 120).unwrap();
        store.delete(&id, Utc::now()).unwrap();

        let created = next(&feed);
        assert_eq!(created.path, "/k1");
        assert_eq!(created.data.unwrap()["delay"], 60);

        let updated = next(&feed);
        assert_eq!(updated, FeedMessage::new("/k1/delay", Some(120.into())));

        assert_eq!(next(&feed), FeedMessage::new("/k1", None));
    }

    #[test]
    fn replay_carries_existing_records() {
        let store = InMemoryKeywordStore::new();
        store.create(&RecordId::from("k1"), body(&["a"], 1)).unwrap();
        let feed = store.subscribe().unwrap();
        let replay = next(&feed);
        assert_eq!(replay.path, "/");
        assert!(replay.data.unwrap().get("k1").is_some());
    }

    #[test]
    fn offline_store_fails_and_closes_feeds() {
        let store = InMemoryKeywordStore::new();
        let feed = store.subscribe().unwrap();
        let _ = next(&feed);

        store.set_available(false).unwrap();
        assert!(matches!(store.get_all(), Err(StorageError::Unavailable(_))));
        assert_eq!(feed.recv_timeout(Duration::from_millis(50)), FeedRecv::Closed);

        store.set_available(true).unwrap();
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn ping_upsert_keeps_one_row_per_record() {
        let pings = InMemoryPingStore::new();
        let id = RecordId::from("k1");
        let t0 = Utc::now();
        pings.upsert_ping(&id, t0).unwrap();
        pings.upsert_ping(&id, t0 + chrono::Duration::seconds(5)).unwrap();

        let all = pings.get_all_pings().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].pinged_at, t0 + chrono::Duration::seconds(5));
    }
}
