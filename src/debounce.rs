//! Per-record alert cooldown.
//!
//! The first alert for a record is never suppressed. Afterwards an alert is due
//! once at least `delay_seconds` have elapsed since the recorded ping.
//!
//! `should_alert` and `record_alert` are separate remote round-trips. To keep
//! concurrent matches for the same record from both passing the check,
//! `run_if_due` holds a per-record lock across check, dispatch, and record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::error::{WatchError, WatchResult};
use crate::record::RecordId;
use crate::storage::PingStore;
use crate::time::Clock;

fn lock_err(context: &'static str) -> WatchError {
    WatchError::internal(format!("poisoned lock: {context}"))
}

/// Result of a serialized cooldown check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDecision<T> {
    /// The cooldown had elapsed; the action ran and the ping was recorded.
    Fired(T),
    /// Still cooling down for `remaining`.
    Suppressed {
        /// Time until the next alert is due.
        remaining: Duration,
    },
}

/// Time left before an alert is due, or `None` if it is due now.
///
/// A ping in the future (clock skew) counts as zero elapsed time.
#[must_use]
pub fn cooldown_remaining(
    last_ping: Option<DateTime<Utc>>,
    delay_seconds: u64,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let last = last_ping?;
    let Some(delay) = i64::try_from(delay_seconds).ok().and_then(Duration::try_seconds) else {
        // Cooldowns beyond chrono's range never elapse.
        return Some(Duration::MAX);
    };
    let elapsed = (now - last).max(Duration::zero());
    if elapsed >= delay {
        None
    } else {
        Some(delay - elapsed)
    }
}

/// Decides whether a matched record may alert, and records alerts.
pub struct AlertDebouncer {
    pings: Arc<dyn PingStore>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<RecordId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for AlertDebouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDebouncer").finish_non_exhaustive()
    }
}

impl AlertDebouncer {
    /// Creates a debouncer reading and writing pings through `pings`.
    #[must_use]
    pub fn new(pings: Arc<dyn PingStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pings,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// True if no ping exists for `id` or its cooldown has elapsed.
    ///
    /// Unserialized; prefer `run_if_due` when acting on the answer.
    pub fn should_alert(&self, id: &RecordId, delay_seconds: u64) -> WatchResult<bool> {
        Ok(self.remaining(id, delay_seconds)?.is_none())
    }

    /// Upsert the ping for `id` to the current time.
    pub fn record_alert(&self, id: &RecordId) -> WatchResult<()> {
        let now = self.clock.now();
        self.pings.upsert_ping(id, now)?;
        tracing::debug!(%id, pinged_at = %now, "alert recorded");
        Ok(())
    }

    /// Run `action` if the cooldown for `id` has elapsed, recording the ping
    /// only when `action` succeeds. Calls for the same id are serialized.
    ///
    /// # Errors
    ///
    /// Returns the error from the ping lookup, from `action` (nothing is
    /// recorded), or from recording the ping after a successful action.
    pub fn run_if_due<T, F>(&self, id: &RecordId, delay_seconds: u64, action: F) -> WatchResult<AlertDecision<T>>
    where
        F: FnOnce() -> WatchResult<T>,
    {
        let lock = self.lock_for(id)?;
        let _guard = lock.lock().map_err(|_| lock_err("debounce.record"))?;

        if let Some(remaining) = self.remaining(id, delay_seconds)? {
            tracing::debug!(%id, remaining_secs = remaining.num_seconds(), "alert suppressed by cooldown");
            return Ok(AlertDecision::Suppressed { remaining });
        }

        let out = action()?;
        self.record_alert(id)?;
        Ok(AlertDecision::Fired(out))
    }

    fn remaining(&self, id: &RecordId, delay_seconds: u64) -> WatchResult<Option<Duration>> {
        let last = self.pings.get_ping(id)?.map(|p| p.pinged_at);
        Ok(cooldown_remaining(last, delay_seconds, self.clock.now()))
    }

    fn lock_for(&self, id: &RecordId) -> WatchResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| lock_err("debounce.locks"))?;
        Ok(Arc::clone(locks.entry(id.clone()).or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use crate::error::ExecutionError;
    use crate::storage::InMemoryPingStore;
    use crate::time::ManualClock;

    fn debouncer() -> (AlertDebouncer, Arc<ManualClock>, Arc<InMemoryPingStore>) {
        let clock = Arc::new(ManualClock::default());
        let pings = Arc::new(InMemoryPingStore::new());
        let d = AlertDebouncer::new(pings.clone(), clock.clone());
        (d, clock, pings)
    }

    #[test]
    fn first_alert_is_never_suppressed() {
        let (d, _, _) = debouncer();
        assert!(d.should_alert(&RecordId::from("k1"), 3600).unwrap());
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        let (d, clock, _) = debouncer();
        let id = RecordId::from("k1");
        d.record_alert(&id).unwrap();

        clock.advance(Duration::seconds(59));
        assert!(!d.should_alert(&id, 60).unwrap());
        clock.advance(Duration::seconds(1));
        assert!(d.should_alert(&id, 60).unwrap());
        clock.advance(Duration::seconds(1));
        assert!(d.should_alert(&id, 60).unwrap());
    }

    #[test]
    fn zero_delay_always_due() {
        let (d, _, _) = debouncer();
        let id = RecordId::from("k1");
        d.record_alert(&id).unwrap();
        assert!(d.should_alert(&id, 0).unwrap());
    }

    #[test]
    fn future_ping_counts_as_zero_elapsed() {
        let now = Utc::now();
        let remaining = cooldown_remaining(Some(now + Duration::seconds(30)), 10, now);
        assert_eq!(remaining, Some(Duration::seconds(10)));
    }

    #[test]
    fn huge_delay_never_elapses() {
        let now = Utc::now();
        assert_eq!(cooldown_remaining(Some(now), u64::MAX, now), Some(Duration::MAX));
        assert_eq!(cooldown_remaining(None, u64::MAX, now), None);
    }

    #[test]
    fn failed_action_records_nothing() {
        let (d, _, pings) = debouncer();
        let id = RecordId::from("k1");
        let err = d
            .run_if_due(&id, 60, || -> WatchResult<()> { Err(WatchError::dispatch("c1", "down")) })
            .unwrap_err();
        assert!(matches!(err, WatchError::Execution(ExecutionError::DispatchFailure { .. })));
        assert!(pings.get_ping(&id).unwrap().is_none());
        assert!(d.should_alert(&id, 60).unwrap());
    }

    #[test]
    fn run_if_due_suppresses_within_window() {
        let (d, clock, _) = debouncer();
        let id = RecordId::from("k1");
        assert_eq!(d.run_if_due(&id, 60, || Ok(1)).unwrap(), AlertDecision::Fired(1));
        match d.run_if_due(&id, 60, || Ok(2)).unwrap() {
            AlertDecision::Suppressed { remaining } => assert_eq!(remaining, Duration::seconds(60)),
            other => panic!("expected suppression, got {other:?}"),
        }
        clock.advance(Duration::seconds(61));
        assert_eq!(d.run_if_due(&id, 60, || Ok(3)).unwrap(), AlertDecision::Fired(3));
    }

    #[test]
    fn concurrent_matches_fire_once_per_window() {
        let (d, _, _) = debouncer();
        let d = Arc::new(d);
        let fired = Arc::new(AtomicUsize::new(0));
        let id = RecordId::from("k1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = Arc::clone(&d);
                let fired = Arc::clone(&fired);
                let id = id.clone();
                thread::spawn(move || {
                    d.run_if_due(&id, 60, || {
                        fired.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
