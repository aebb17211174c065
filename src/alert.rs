//! Outbound alerts.
//!
//! An `Alert` is what the watcher hands to the chat platform when a keyword
//! record fires. Formatting belongs to the sink; the payload only carries the
//! matched keyword set and where it should go.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{WatchError, WatchResult};
use crate::record::{KeywordRecord, RecordId};

/// Title of alert messages.
pub const ALERT_TITLE: &str = "Keyword(s) detected!";

/// Titles of messages the bot itself posts. Embeds carrying one of these are
/// never scanned, so the bot does not alert on its own output.
pub const RESERVED_TITLES: [&str; 4] = [
    ALERT_TITLE,
    "Added new keyword!",
    "Deleted keyword(s)",
    "All keyword(s)",
];

/// Alert raised for one keyword record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Record that fired.
    pub record_id: RecordId,
    /// Channel the alert is posted to.
    pub channel_id: String,
    /// The record's keywords, in stored order.
    pub keywords: Vec<String>,
    /// When the match was observed.
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Builds the alert for `record` observed at `raised_at`.
    #[must_use]
    pub fn for_record(record: &KeywordRecord, raised_at: DateTime<Utc>) -> Self {
        Self {
            record_id: record.id.clone(),
            channel_id: record.channel.id.clone(),
            keywords: record.keywords.clone(),
            raised_at,
        }
    }

    /// Message title, always [`ALERT_TITLE`].
    #[must_use]
    pub const fn title(&self) -> &'static str {
        ALERT_TITLE
    }

    /// Keywords as shown to users: comma separated.
    #[must_use]
    pub fn keywords_display(&self) -> String {
        self.keywords.join(", ")
    }
}

/// Delivers alerts to the chat platform.
pub trait AlertSink: Send + Sync {
    /// Send one alert. An `Ok` means the platform accepted it.
    fn dispatch(&self, alert: &Alert) -> WatchResult<()>;
}

/// Sink that forwards alerts into a bounded channel.
///
/// A full or closed channel is a dispatch failure; the sink never blocks.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<Alert>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<Alert>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn dispatch(&self, alert: &Alert) -> WatchResult<()> {
        match self.tx.try_send(alert.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(WatchError::dispatch(&alert.channel_id, "alert queue full")),
            Err(TrySendError::Disconnected(_)) => {
                Err(WatchError::dispatch(&alert.channel_id, "alert receiver closed"))
            }
        }
    }
}
