//! # keywatch - keyword alerting for chat streams
//!
//! keywatch watches a stream of chat messages arriving on many channels and
//! raises an alert whenever a configured keyword set appears in a message on
//! the set's channel, at most once per cooldown window.
//!
//! ## Core Concepts
//!
//! - **Keyword record**: a conjunction of keywords scoped to one channel, with a cooldown
//! - **Mirror**: local replica of the remote record collection, kept current by its change feed
//! - **Match engine**: case-insensitive all-keywords substring match over a mirror snapshot
//! - **Debouncer**: per-record cooldown backed by the remote ping history
//! - **Watcher**: wires inbound events through matching and cooldowns to an alert sink
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use keywatch::{
//!     ChangeFeedMirror, ChannelRef, ChannelSink, Commands, InMemoryStores, InboundEvent,
//!     KeywordWatcher, MirrorConfig, SystemClock,
//! };
//!
//! let stores = InMemoryStores::new();
//! let keywords = Arc::new(stores.keywords);
//! let pings = Arc::new(stores.pings);
//! let clock = Arc::new(SystemClock);
//!
//! let commands = Commands::new(keywords.clone(), clock.clone(), 10);
//! commands.add_record("urgent deploy", ChannelRef::new("c1", "ops"), 60)?;
//!
//! let mirror = Arc::new(ChangeFeedMirror::new(keywords, clock.clone(), MirrorConfig::default()));
//! mirror.initialize()?;
//! mirror.start()?;
//! mirror.wait_until_synced(std::time::Duration::from_secs(1))?;
//!
//! let (sink, alerts) = ChannelSink::new(16);
//! let watcher = KeywordWatcher::new(mirror.clone(), pings, Arc::new(sink), clock);
//! let outcome = watcher.handle_event(&InboundEvent::new("c1", "we need an URGENT deploy now"));
//! assert_eq!(outcome.dispatched, 1);
//! assert_eq!(alerts.recv()?.keywords_display(), "urgent, deploy");
//!
//! mirror.shutdown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Records, errors, time
pub mod error;
pub mod record;
pub mod time;

// Remote store boundary
pub mod storage;

// Synchronization, matching, debounce
pub mod debounce;
pub mod feed;
pub mod matcher;
pub mod mirror;

// Event flow and operator surface
pub mod alert;
pub mod commands;
pub mod config;
pub mod event;
pub mod watcher;

// Re-export primary types at crate root for convenience
pub use alert::{Alert, AlertSink, ChannelSink};
pub use commands::{Commands, RecordPage};
pub use config::WatchConfig;
pub use debounce::{AlertDebouncer, AlertDecision};
pub use error::{ExecutionError, ValidationError, WatchError, WatchResult};
pub use event::{Embed, EmbedField, InboundEvent};
pub use feed::{classify, Delta, RecordField};
pub use matcher::{matches_all, MatchEngine};
pub use mirror::{ChangeFeedMirror, MirrorConfig, MirrorHealth, MirrorSnapshot};
pub use record::{ChannelRef, KeywordRecord, KeywordRecordBody, PingRecord, RecordId, Tombstone};
pub use storage::{
    ChangeFeed, Deadline, FeedMessage, InMemoryKeywordStore, InMemoryPingStore, InMemoryStores,
    KeywordStore, PingStore, StorageError,
};
pub use time::{Clock, ManualClock, SystemClock};
pub use watcher::{EventOutcome, KeywordWatcher, WatcherRuntime, WatcherRuntimeConfig};
