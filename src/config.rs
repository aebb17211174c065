//! Runtime configuration.
//!
//! Defaults are suitable for a single bot instance. Every field can be
//! overridden through a `KEYWATCH_*` environment variable, or the whole struct
//! can be deserialized from JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::mirror::MirrorConfig;
use crate::watcher::WatcherRuntimeConfig;

/// Settings for one keywatch instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Event handler threads.
    pub workers: usize,
    /// Bounded inbound event queue.
    pub event_queue_capacity: usize,
    /// Deadline for every remote store call.
    pub remote_timeout_ms: u64,
    /// First reconnect delay; doubles after each failed attempt.
    pub reconnect_initial_backoff_ms: u64,
    /// Cap on the reconnect delay.
    pub reconnect_max_backoff_ms: u64,
    /// Zero retries forever.
    pub reconnect_max_attempts: u32,
    /// Records per listing page.
    pub page_size: usize,
    /// Grace period before a disconnected mirror reports stale.
    pub stale_after_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            event_queue_capacity: 1024,
            remote_timeout_ms: 5000,
            reconnect_initial_backoff_ms: 250,
            reconnect_max_backoff_ms: 30_000,
            reconnect_max_attempts: 0,
            page_size: 10,
            stale_after_secs: 300,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ValidationError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ValidationError::InvalidConfig {
        field: key.to_string(),
        reason: format!("cannot parse {raw:?}: {e}"),
    })
}

impl WatchConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup(key)` for each `KEYWATCH_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ValidationError> {
        let mut cfg = Self::default();

        macro_rules! apply {
            ($key:literal => $field:ident) => {
                if let Some(raw) = lookup($key) {
                    cfg.$field = parse($key, &raw)?;
                }
            };
        }

        apply!("KEYWATCH_WORKERS" => workers);
        apply!("KEYWATCH_EVENT_QUEUE" => event_queue_capacity);
        apply!("KEYWATCH_REMOTE_TIMEOUT_MS" => remote_timeout_ms);
        apply!("KEYWATCH_RECONNECT_BACKOFF_MS" => reconnect_initial_backoff_ms);
        apply!("KEYWATCH_RECONNECT_MAX_BACKOFF_MS" => reconnect_max_backoff_ms);
        apply!("KEYWATCH_RECONNECT_MAX_ATTEMPTS" => reconnect_max_attempts);
        apply!("KEYWATCH_PAGE_SIZE" => page_size);
        apply!("KEYWATCH_STALE_AFTER_SECS" => stale_after_secs);

        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects zero sizes and an initial backoff above the maximum.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |field: &str, reason: &str| ValidationError::InvalidConfig {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.event_queue_capacity == 0 {
            return Err(invalid("event_queue_capacity", "must be at least 1"));
        }
        if self.remote_timeout_ms == 0 {
            return Err(invalid("remote_timeout_ms", "must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size", "must be at least 1"));
        }
        if self.reconnect_initial_backoff_ms > self.reconnect_max_backoff_ms {
            return Err(invalid(
                "reconnect_initial_backoff_ms",
                "must not exceed reconnect_max_backoff_ms",
            ));
        }
        Ok(())
    }

    /// Per-call deadline for remote store calls.
    #[must_use]
    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Grace period for [`MirrorHealth::is_stale`](crate::MirrorHealth::is_stale).
    #[must_use]
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX))
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Reconnect policy for the mirror worker.
    #[must_use]
    pub const fn mirror_config(&self) -> MirrorConfig {
        MirrorConfig {
            reconnect_initial_backoff: Duration::from_millis(self.reconnect_initial_backoff_ms),
            reconnect_max_backoff: Duration::from_millis(self.reconnect_max_backoff_ms),
            reconnect_max_attempts: self.reconnect_max_attempts,
        }
    }

    /// Worker pool settings.
    #[must_use]
    pub const fn runtime_config(&self) -> WatcherRuntimeConfig {
        WatcherRuntimeConfig {
            workers: self.workers,
            queue_capacity: self.event_queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        WatchConfig::default().validate().unwrap();
        assert_eq!(WatchConfig::from_lookup(lookup(&[])).unwrap(), WatchConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = WatchConfig::from_lookup(lookup(&[
            ("KEYWATCH_WORKERS", "2"),
            ("KEYWATCH_PAGE_SIZE", " 25 "),
            ("KEYWATCH_RECONNECT_MAX_ATTEMPTS", "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.page_size, 25);
        assert_eq!(cfg.mirror_config().reconnect_max_attempts, 3);
    }

    #[test]
    fn unparsable_override_names_the_key() {
        let err = WatchConfig::from_lookup(lookup(&[("KEYWATCH_WORKERS", "many")])).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidConfig { ref field, .. } if field == "KEYWATCH_WORKERS"));
    }

    #[test]
    fn rejects_inverted_backoff() {
        let cfg = WatchConfig {
            reconnect_initial_backoff_ms: 10_000,
            reconnect_max_backoff_ms: 100,
            ..WatchConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: WatchConfig = serde_json::from_str(r#"{"workers": 8}"#).unwrap();
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.page_size, 10);
    }
}
