//! Local mirror of the remote keyword collection.
//!
//! `ChangeFeedMirror` owns the `id -> record` mapping. It is populated by one
//! full read (`initialize`) and then kept current by a dedicated worker thread
//! that applies change feed deltas in delivery order (`start`).
//!
//! Readers never see a partially applied delta: the mapping lives behind an
//! `Arc` that the writer replaces copy-on-write under the write lock, and
//! `snapshot()` hands out a clone of that `Arc`. A snapshot therefore reflects
//! an exact prefix of the applied deltas and stays immutable for as long as the
//! reader holds it.
//!
//! When the feed connection drops the worker resubscribes with exponential
//! backoff and resynchronizes from a full read before resuming.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};

use crate::error::{ExecutionError, WatchError, WatchResult};
use crate::feed::{classify, Delta, RecordField};
use crate::record::{KeywordRecord, RecordId};
use crate::storage::{ChangeFeed, FeedMessage, KeywordStore};
use crate::time::Clock;

fn lock_err(context: &'static str) -> WatchError {
    WatchError::internal(format!("poisoned lock: {context}"))
}

/// Reconnect policy for the feed worker.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Delay before the first resubscribe attempt.
    pub reconnect_initial_backoff: Duration,
    /// Upper bound for the doubling backoff.
    pub reconnect_max_backoff: Duration,
    /// Give up after this many failed attempts. Zero retries forever.
    pub reconnect_max_attempts: u32,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_backoff: Duration::from_millis(250),
            reconnect_max_backoff: Duration::from_secs(30),
            reconnect_max_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MirrorView {
    records: HashMap<RecordId, Arc<KeywordRecord>>,
    retired: HashSet<RecordId>,
    synced: bool,
}

/// Immutable point-in-time view of the mirror.
#[derive(Debug, Clone)]
pub struct MirrorSnapshot {
    view: Arc<MirrorView>,
}

impl MirrorSnapshot {
    /// Whether the initial sync had completed when this snapshot was taken.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.view.synced
    }

    /// Number of mirrored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.view.records.len()
    }

    /// True if no records are mirrored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.view.records.is_empty()
    }

    /// The record with `id`, if mirrored.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&Arc<KeywordRecord>> {
        self.view.records.get(id)
    }

    /// All records, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &Arc<KeywordRecord>> {
        self.view.records.values()
    }

    /// Records scoped to `channel_id`, ordered by id.
    #[must_use]
    pub fn for_channel(&self, channel_id: &str) -> Vec<Arc<KeywordRecord>> {
        let mut out: Vec<Arc<KeywordRecord>> = self
            .view
            .records
            .values()
            .filter(|r| r.channel_id() == channel_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

/// Freshness indicators for the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorHealth {
    /// Initial sync has completed.
    pub synced: bool,
    /// A feed subscription is live.
    pub connected: bool,
    /// Number of mirrored records.
    pub records: usize,
    /// Feed deltas applied since creation.
    pub applied_deltas: u64,
    /// Successful resubscriptions.
    pub reconnects: u64,
    /// When the mapping last changed, by delta or full read.
    pub last_delta_at: Option<DateTime<Utc>>,
    /// When the current disconnect began; `None` while connected.
    pub disconnected_since: Option<DateTime<Utc>>,
}

impl MirrorHealth {
    /// True when the mirror cannot be trusted to reflect the remote store:
    /// not yet synced, never connected, or disconnected for at least `grace`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        if !self.synced {
            return true;
        }
        match self.disconnected_since {
            Some(since) => now - since >= grace,
            None => !self.connected,
        }
    }
}

#[derive(Debug, Default)]
struct HealthState {
    last_delta_at: Option<DateTime<Utc>>,
    disconnected_since: Option<DateTime<Utc>>,
}

struct MirrorShared {
    store: Arc<dyn KeywordStore>,
    clock: Arc<dyn Clock>,
    view: RwLock<Arc<MirrorView>>,
    connected: AtomicBool,
    applied: AtomicU64,
    reconnects: AtomicU64,
    health: Mutex<HealthState>,
}

impl MirrorShared {
    fn snapshot(&self) -> WatchResult<MirrorSnapshot> {
        let view = self.view.read().map_err(|_| lock_err("mirror.snapshot"))?;
        Ok(MirrorSnapshot {
            view: Arc::clone(&view),
        })
    }

    /// Replace the mapping with a full read of the store.
    fn load(&self, records: Vec<KeywordRecord>, mark_synced: bool) -> WatchResult<usize> {
        let mut guard = self.view.write().map_err(|_| lock_err("mirror.load"))?;
        let view = Arc::make_mut(&mut guard);
        view.records = records
            .into_iter()
            .filter(|r| !view.retired.contains(&r.id))
            .map(|r| (r.id.clone(), Arc::new(r)))
            .collect();
        if mark_synced {
            view.synced = true;
        }
        let count = view.records.len();
        drop(guard);
        self.touch()?;
        Ok(count)
    }

    fn apply_message(&self, msg: &FeedMessage) -> WatchResult<Delta> {
        let mut guard = self.view.write().map_err(|_| lock_err("mirror.apply"))?;
        let delta = classify(msg, guard.synced);
        let view = Arc::make_mut(&mut guard);
        apply_delta(view, &delta);
        drop(guard);

        self.applied.fetch_add(1, Ordering::Relaxed);
        self.touch()?;
        Ok(delta)
    }

    fn touch(&self) -> WatchResult<()> {
        let now = self.clock.now();
        let mut health = self.health.lock().map_err(|_| lock_err("mirror.health"))?;
        health.last_delta_at = Some(now);
        Ok(())
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        let now = self.clock.now();
        if let Ok(mut health) = self.health.lock() {
            health.disconnected_since = if connected { None } else { Some(now) };
        }
    }
}

fn apply_delta(view: &mut MirrorView, delta: &Delta) {
    match delta {
        Delta::Creation(record) => {
            if view.retired.contains(&record.id) {
                tracing::warn!(id = %record.id, "ignoring creation of a deleted record id");
                return;
            }
            tracing::debug!(id = %record.id, channel = %record.channel.id, "record created");
            view.records.insert(record.id.clone(), Arc::new(record.clone()));
        }
        Delta::FieldUpdate {
            id,
            field: RecordField::Delay(delay),
        } => match view.records.get_mut(id) {
            Some(slot) => {
                let mut updated = KeywordRecord::clone(slot);
                updated.delay_seconds = *delay;
                *slot = Arc::new(updated);
                tracing::debug!(%id, delay, "record delay updated");
            }
            None => tracing::debug!(%id, "delay update for unknown record ignored"),
        },
        Delta::Deletion(id) => {
            if view.records.remove(id).is_some() {
                tracing::debug!(%id, "record deleted");
            }
            view.retired.insert(id.clone());
        }
        Delta::SyncMarker => {
            if !view.synced {
                view.synced = true;
                tracing::info!(records = view.records.len(), "keyword mirror synced");
            }
        }
    }
}

struct Worker {
    shutdown_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// In-memory replica of the keyword collection.
pub struct ChangeFeedMirror {
    shared: Arc<MirrorShared>,
    cfg: MirrorConfig,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for ChangeFeedMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeedMirror")
            .field("cfg", &self.cfg)
            .field("connected", &self.shared.connected.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl ChangeFeedMirror {
    /// Creates an empty, unsynced mirror over `store`. Call `initialize` then `start`.
    #[must_use]
    pub fn new(store: Arc<dyn KeywordStore>, clock: Arc<dyn Clock>, cfg: MirrorConfig) -> Self {
        Self {
            shared: Arc::new(MirrorShared {
                store,
                clock,
                view: RwLock::new(Arc::new(MirrorView::default())),
                connected: AtomicBool::new(false),
                applied: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
                health: Mutex::new(HealthState::default()),
            }),
            cfg,
            worker: Mutex::new(None),
        }
    }

    /// Populate the mirror from a full read of the store.
    ///
    /// An empty collection marks the mirror synced immediately; otherwise the
    /// mirror becomes synced when the feed's initial replay arrives.
    ///
    /// # Errors
    ///
    /// Propagates store failures (`RemoteUnavailable`, `Timeout`).
    pub fn initialize(&self) -> WatchResult<usize> {
        let records = self.shared.store.get_all()?;
        let empty = records.is_empty();
        let count = self.shared.load(records, empty)?;
        if empty {
            tracing::info!("keyword collection empty; mirror synced");
        } else {
            tracing::info!(records = count, "keyword mirror initialized");
        }
        Ok(count)
    }

    /// Subscribe to the change feed, refresh the mapping from a full read, and
    /// spawn the worker that applies deltas.
    ///
    /// Calling `start` on a running mirror is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the subscription or the refresh read cannot be completed.
    pub fn start(&self) -> WatchResult<()> {
        let mut worker = self.worker.lock().map_err(|_| lock_err("mirror.worker"))?;
        if worker.is_some() {
            return Ok(());
        }

        // Subscribe before the full read: writes committed since `initialize`
        // land in the fresh read, later ones are buffered on the feed.
        let feed = self.shared.store.subscribe()?;
        let count = self.shared.load(self.shared.store.get_all()?, false)?;
        tracing::debug!(records = count, "mirror refreshed on subscribe");
        self.shared.set_connected(true);

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let cfg = self.cfg.clone();
        let join = thread::Builder::new()
            .name("keywatch-mirror".to_string())
            .spawn(move || feed_loop(&shared, &cfg, feed, &shutdown_rx))
            .map_err(|e| WatchError::internal(format!("failed to spawn mirror worker: {e}")))?;

        *worker = Some(Worker { shutdown_tx, join });
        tracing::info!("change feed subscription started");
        Ok(())
    }

    /// Stop consuming the feed and wait for the worker to exit.
    ///
    /// Idempotent. The mapping is left as-is and remains readable.
    pub fn shutdown(&self) -> WatchResult<()> {
        let taken = self.worker.lock().map_err(|_| lock_err("mirror.worker"))?.take();
        let Some(Worker { shutdown_tx, join }) = taken else {
            return Ok(());
        };
        let _ = shutdown_tx.try_send(());
        drop(shutdown_tx);
        join.join()
            .map_err(|_| WatchError::internal("mirror worker panicked"))?;
        tracing::info!("change feed subscription stopped");
        Ok(())
    }

    /// Apply one raw feed message on the caller's thread.
    ///
    /// Used by embedders that drive the feed themselves, and by tests.
    pub fn apply(&self, msg: &FeedMessage) -> WatchResult<Delta> {
        self.shared.apply_message(msg)
    }

    /// Current immutable view.
    pub fn snapshot(&self) -> WatchResult<MirrorSnapshot> {
        self.shared.snapshot()
    }

    /// Block until the mirror is synced or `timeout` elapses.
    pub fn wait_until_synced(&self, timeout: Duration) -> WatchResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.snapshot()?.is_synced() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ExecutionError::Timeout {
                    duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                }
                .into());
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Freshness indicators.
    pub fn health(&self) -> WatchResult<MirrorHealth> {
        let snapshot = self.snapshot()?;
        let health = self.shared.health.lock().map_err(|_| lock_err("mirror.health"))?;
        Ok(MirrorHealth {
            synced: snapshot.is_synced(),
            connected: self.shared.connected.load(Ordering::Acquire),
            records: snapshot.len(),
            applied_deltas: self.shared.applied.load(Ordering::Relaxed),
            reconnects: self.shared.reconnects.load(Ordering::Relaxed),
            last_delta_at: health.last_delta_at,
            disconnected_since: health.disconnected_since,
        })
    }
}

impl Drop for ChangeFeedMirror {
    fn drop(&mut self) {
        // Signal only; do not join a worker that may be mid-reconnect.
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(Worker { shutdown_tx, join }) = guard.take() {
                let _ = shutdown_tx.try_send(());
                drop(join);
            }
        }
    }
}

fn feed_loop(
    shared: &MirrorShared,
    cfg: &MirrorConfig,
    mut feed: ChangeFeed,
    shutdown_rx: &Receiver<()>,
) {
    loop {
        let next = select! {
            recv(shutdown_rx) -> _ => None,
            recv(feed.receiver()) -> msg => Some(msg),
        };
        let Some(msg) = next else {
            break;
        };

        match msg {
            Ok(msg) => {
                if let Err(e) = shared.apply_message(&msg) {
                    tracing::error!(error = %e, path = %msg.path, "failed to apply delta");
                }
            }
            Err(_) => {
                shared.set_connected(false);
                tracing::warn!("change feed disconnected; mirror is stale until resubscribed");
                match reconnect(shared, cfg, shutdown_rx) {
                    Some(next) => feed = next,
                    None => break,
                }
            }
        }
    }
    shared.set_connected(false);
}

/// Resubscribe with backoff, then resync from a full read.
///
/// Subscribing before the read means deltas written in between are buffered
/// on the new feed and reapplied on top of the fresh state.
fn reconnect(
    shared: &MirrorShared,
    cfg: &MirrorConfig,
    shutdown_rx: &Receiver<()>,
) -> Option<ChangeFeed> {
    let mut backoff = cfg.reconnect_initial_backoff;
    let mut attempt: u32 = 0;

    loop {
        match shutdown_rx.recv_timeout(backoff) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return None,
            Err(RecvTimeoutError::Timeout) => {}
        }
        attempt = attempt.saturating_add(1);

        let result = shared
            .store
            .subscribe()
            .map_err(WatchError::from)
            .and_then(|feed| {
                let records = shared.store.get_all()?;
                let count = shared.load(records, true)?;
                Ok((feed, count))
            });

        match result {
            Ok((feed, count)) => {
                shared.reconnects.fetch_add(1, Ordering::Relaxed);
                shared.set_connected(true);
                tracing::info!(attempt, records = count, "change feed resubscribed");
                return Some(feed);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "resubscribe failed");
                if cfg.reconnect_max_attempts > 0 && attempt >= cfg.reconnect_max_attempts {
                    tracing::error!(attempt, "giving up on change feed; mirror will stay stale");
                    return None;
                }
                backoff = (backoff * 2).min(cfg.reconnect_max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::storage::InMemoryKeywordStore;
    use crate::time::SystemClock;

    fn mirror_over(store: Arc<InMemoryKeywordStore>) -> ChangeFeedMirror {
        ChangeFeedMirror::new(store, Arc::new(SystemClock), MirrorConfig::default())
    }

    fn body(delay: u64) -> serde_json::Value {
        json!({"keywords": ["urgent", "deploy"], "channel": {"id": "c1", "name": "ops"}, "delay": delay})
    }

    #[test]
    fn empty_collection_syncs_on_initialize() {
        let mirror = mirror_over(Arc::new(InMemoryKeywordStore::new()));
        assert_eq!(mirror.initialize().unwrap(), 0);
        assert!(mirror.snapshot().unwrap().is_synced());
    }

    #[test]
    fn non_empty_collection_waits_for_replay_marker() {
        let store = Arc::new(InMemoryKeywordStore::new());
        store
            .create(&RecordId::from("k1"), serde_json::from_value(body(60)).unwrap())
            .unwrap();
        let mirror = mirror_over(store);
        assert_eq!(mirror.initialize().unwrap(), 1);
        assert!(!mirror.snapshot().unwrap().is_synced());

        let delta = mirror.apply(&FeedMessage::new("/", Some(json!({"k1": body(60)})))).unwrap();
        assert_eq!(delta, Delta::SyncMarker);
        let snap = mirror.snapshot().unwrap();
        assert!(snap.is_synced());
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn delay_update_touches_only_delay() {
        let mirror = mirror_over(Arc::new(InMemoryKeywordStore::new()));
        mirror.initialize().unwrap();
        mirror.apply(&FeedMessage::new("/k1", Some(body(60)))).unwrap();

        let before = mirror.snapshot().unwrap();
        mirror.apply(&FeedMessage::new("/k1/delay", Some(json!(120)))).unwrap();
        mirror.apply(&FeedMessage::new("/k1/delay", Some(json!(120)))).unwrap();

        let after = mirror.snapshot().unwrap();
        let old = before.get(&RecordId::from("k1")).unwrap();
        let new = after.get(&RecordId::from("k1")).unwrap();
        assert_eq!(old.delay_seconds, 60);
        assert_eq!(new.delay_seconds, 120);
        assert_eq!(new.keywords, old.keywords);
        assert_eq!(new.channel, old.channel);
    }

    #[test]
    fn deleted_id_never_reappears() {
        let mirror = mirror_over(Arc::new(InMemoryKeywordStore::new()));
        mirror.initialize().unwrap();
        mirror.apply(&FeedMessage::new("/k1", Some(body(60)))).unwrap();
        mirror.apply(&FeedMessage::new("/k1", None)).unwrap();
        mirror.apply(&FeedMessage::new("/k1", Some(body(60)))).unwrap();
        assert!(mirror.snapshot().unwrap().is_empty());
    }

    #[test]
    fn health_reports_applied_deltas() {
        let mirror = mirror_over(Arc::new(InMemoryKeywordStore::new()));
        mirror.initialize().unwrap();
        mirror.apply(&FeedMessage::new("/k1", Some(body(5)))).unwrap();
        let health = mirror.health().unwrap();
        assert!(health.synced);
        assert!(!health.connected);
        assert_eq!(health.applied_deltas, 1);
        assert_eq!(health.records, 1);
        assert!(health.is_stale(Utc::now(), chrono::Duration::seconds(60)));
    }

    #[test]
    fn shutdown_without_start_is_noop() {
        let mirror = mirror_over(Arc::new(InMemoryKeywordStore::new()));
        mirror.shutdown().unwrap();
    }
}
