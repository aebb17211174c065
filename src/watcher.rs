//! Event orchestration.
//!
//! `KeywordWatcher` turns one inbound event into alerts: match against a
//! single mirror snapshot, run the cooldown check per matched record, dispatch,
//! and record the ping only after a successful dispatch. Failures are logged
//! and counted, never propagated, so one bad event cannot stop the stream.
//!
//! `WatcherRuntime` runs a small pool of worker threads over a bounded event
//! queue. Enqueueing never blocks the caller; when the queue is full the event
//! is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::alert::{Alert, AlertSink};
use crate::debounce::{AlertDebouncer, AlertDecision};
use crate::error::{WatchError, WatchResult};
use crate::event::InboundEvent;
use crate::matcher::MatchEngine;
use crate::mirror::ChangeFeedMirror;
use crate::storage::PingStore;
use crate::time::Clock;

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventOutcome {
    /// Record matches across all text units.
    pub matched: usize,
    /// Alerts delivered.
    pub dispatched: usize,
    /// Matches held back by a cooldown.
    pub suppressed: usize,
    /// Matches that failed while checking, dispatching, or recording.
    pub failed: usize,
    /// The event was ignored because the mirror was not yet synced.
    pub skipped: bool,
}

/// Wires matching, cooldowns, and the alert sink together.
pub struct KeywordWatcher {
    mirror: Arc<ChangeFeedMirror>,
    debouncer: AlertDebouncer,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for KeywordWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordWatcher")
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

impl KeywordWatcher {
    /// Creates a watcher. The debouncer shares `clock` with alert timestamps.
    #[must_use]
    pub fn new(
        mirror: Arc<ChangeFeedMirror>,
        pings: Arc<dyn PingStore>,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mirror,
            debouncer: AlertDebouncer::new(pings, Arc::clone(&clock)),
            sink,
            clock,
        }
    }

    /// The mirror events are matched against.
    #[must_use]
    pub fn mirror(&self) -> &Arc<ChangeFeedMirror> {
        &self.mirror
    }

    /// The cooldown gate.
    #[must_use]
    pub fn debouncer(&self) -> &AlertDebouncer {
        &self.debouncer
    }

    /// Process one event. Never fails; problems are logged and counted.
    pub fn handle_event(&self, event: &InboundEvent) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        if let Err(e) = self.process(event, &mut outcome) {
            tracing::warn!(channel = %event.channel_id, error = %e, "event processing failed");
            outcome.failed += 1;
        }
        outcome
    }

    fn process(&self, event: &InboundEvent, outcome: &mut EventOutcome) -> WatchResult<()> {
        let snapshot = self.mirror.snapshot()?;
        if !snapshot.is_synced() {
            tracing::debug!(channel = %event.channel_id, "mirror not synced; event skipped");
            outcome.skipped = true;
            return Ok(());
        }

        for text in event.text_units() {
            for record in MatchEngine::matches_in(&snapshot, &event.channel_id, &text) {
                outcome.matched += 1;
                let alert = Alert::for_record(&record, self.clock.now());
                let decision = self
                    .debouncer
                    .run_if_due(&record.id, record.delay_seconds, || self.sink.dispatch(&alert));

                match decision {
                    Ok(AlertDecision::Fired(())) => {
                        outcome.dispatched += 1;
                        tracing::info!(
                            id = %record.id,
                            channel = %alert.channel_id,
                            keywords = %alert.keywords_display(),
                            "keyword alert dispatched"
                        );
                    }
                    Ok(AlertDecision::Suppressed { .. }) => outcome.suppressed += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        tracing::warn!(id = %record.id, error = %e, "keyword alert failed");
                    }
                }
            }
        }
        Ok(())
    }
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WatcherRuntimeConfig {
    /// Number of handler threads.
    pub workers: usize,
    /// Capacity of the inbound event queue.
    pub queue_capacity: usize,
}

impl Default for WatcherRuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeCounters {
    processed: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Running pool of event handlers.
#[derive(Debug)]
pub struct WatcherRuntime {
    watcher: Arc<KeywordWatcher>,
    tx: Option<Sender<InboundEvent>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<RuntimeCounters>,
}

impl WatcherRuntime {
    /// Spawn `cfg.workers` handler threads.
    pub fn spawn(watcher: Arc<KeywordWatcher>, cfg: &WatcherRuntimeConfig) -> WatchResult<Self> {
        let (tx, rx) = bounded::<InboundEvent>(cfg.queue_capacity.max(1));
        let counters = Arc::new(RuntimeCounters::default());

        let mut workers = Vec::with_capacity(cfg.workers.max(1));
        for i in 0..cfg.workers.max(1) {
            let rx = rx.clone();
            let watcher = Arc::clone(&watcher);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("keywatch-worker-{i}"))
                .spawn(move || worker_loop(&watcher, &rx, &counters))
                .map_err(|e| WatchError::internal(format!("failed to spawn watcher worker: {e}")))?;
            workers.push(handle);
        }

        Ok(Self {
            watcher,
            tx: Some(tx),
            workers,
            counters,
        })
    }

    /// Enqueue an event without blocking. Returns false if it was dropped.
    pub fn submit(&self, event: InboundEvent) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) | Err(TrySendError::Disconnected(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(channel = %event.channel_id, "event queue full; event dropped");
                false
            }
        }
    }

    /// Events fully handled.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    /// Alerts delivered.
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.counters.dispatched.load(Ordering::Relaxed)
    }

    /// Matches that failed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Events dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// The shared watcher behind the pool.
    #[must_use]
    pub fn watcher(&self) -> &Arc<KeywordWatcher> {
        &self.watcher
    }

    /// Stop the feed, close the queue, and wait for queued and in-flight
    /// events to finish.
    pub fn shutdown(mut self) -> WatchResult<()> {
        let mirror_result = self.watcher.mirror().shutdown();
        self.tx.take();
        let mut panicked = false;
        for handle in self.workers.drain(..) {
            panicked |= handle.join().is_err();
        }
        mirror_result?;
        if panicked {
            return Err(WatchError::internal("watcher worker panicked"));
        }
        tracing::info!(processed = self.processed(), dropped = self.dropped(), "watcher stopped");
        Ok(())
    }
}

fn worker_loop(watcher: &KeywordWatcher, rx: &Receiver<InboundEvent>, counters: &RuntimeCounters) {
    while let Ok(event) = rx.recv() {
        let outcome = watcher.handle_event(&event);
        counters.processed.fetch_add(1, Ordering::Relaxed);
        counters
            .dispatched
            .fetch_add(outcome.dispatched as u64, Ordering::Relaxed);
        counters.failed.fetch_add(outcome.failed as u64, Ordering::Relaxed);
    }
}
