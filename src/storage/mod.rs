//! Storage layer for keywatch.
//!
//! The traits describe the remote record store; the in-memory backend
//! implements them for tests and the bundled binary.

pub mod deadline;
pub mod memory;
pub mod seed;
mod traits;

pub use deadline::Deadline;
pub use memory::{InMemoryKeywordStore, InMemoryPingStore, InMemoryStores};
pub use seed::{load_records_file, parse_records, seed_store};
pub use traits::{ChangeFeed, FeedMessage, FeedRecv, KeywordStore, PingStore, StorageError};
