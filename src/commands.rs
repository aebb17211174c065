//! Operator command surface.
//!
//! Thin wrappers over the record store used by chat commands. These talk to
//! the store directly (never the mirror) and surface every failure to the
//! caller; the mirror picks up the resulting writes from the change feed.

use std::sync::Arc;

use crate::error::{ValidationError, WatchResult};
use crate::record::{ChannelRef, KeywordRecord, KeywordRecordBody, RecordId};
use crate::storage::KeywordStore;
use crate::time::Clock;

/// One page of the record listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPage {
    /// 1-based page number.
    pub page: usize,
    /// Number of pages; at least 1.
    pub total_pages: usize,
    /// Records across all pages.
    pub total_records: usize,
    /// Records on this page.
    pub records: Vec<KeywordRecord>,
}

/// Create, list, update, and remove keyword records.
pub struct Commands {
    store: Arc<dyn KeywordStore>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl std::fmt::Debug for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl Commands {
    /// Creates the command surface. A `page_size` of zero is treated as 1.
    #[must_use]
    pub fn new(store: Arc<dyn KeywordStore>, clock: Arc<dyn Clock>, page_size: usize) -> Self {
        Self {
            store,
            clock,
            page_size: page_size.max(1),
        }
    }

    /// List records ordered by channel name, then id.
    ///
    /// An empty collection yields a single empty page.
    ///
    /// # Errors
    ///
    /// `InvalidPage` if `page` is zero or past the last page.
    pub fn list_records(&self, page: usize) -> WatchResult<RecordPage> {
        let mut records = self.store.get_all()?;
        records.sort_by(|a, b| {
            a.channel
                .name
                .cmp(&b.channel.name)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total_records = records.len();
        let total_pages = total_records.div_ceil(self.page_size).max(1);
        if page == 0 || page > total_pages {
            return Err(ValidationError::InvalidPage { page, total_pages }.into());
        }

        let records = records
            .into_iter()
            .skip((page - 1) * self.page_size)
            .take(self.page_size)
            .collect();
        Ok(RecordPage {
            page,
            total_pages,
            total_records,
            records,
        })
    }

    /// Create a record from space-separated keyword text. Returns the new id.
    pub fn add_record(&self, keywords_text: &str, channel: ChannelRef, delay_seconds: u64) -> WatchResult<RecordId> {
        let body = KeywordRecordBody {
            keywords: keywords_text.split_whitespace().map(str::to_string).collect(),
            channel,
            delay: delay_seconds,
        };
        body.validate()?;

        let id = RecordId::generate();
        self.store.create(&id, body)?;
        tracing::info!(%id, keywords = keywords_text, delay_seconds, "keyword record added");
        Ok(id)
    }

    /// Delete every record in `channel_id` whose space-joined keywords equal
    /// `keywords_text` exactly. Returns the deleted ids; each one is logged to
    /// the deleted-records log by the store.
    pub fn remove_records(&self, keywords_text: &str, channel_id: &str) -> WatchResult<Vec<RecordId>> {
        let matching: Vec<RecordId> = self
            .store
            .get_all()?
            .into_iter()
            .filter(|r| r.channel_id() == channel_id && r.keywords_text() == keywords_text)
            .map(|r| r.id)
            .collect();

        let mut deleted = Vec::with_capacity(matching.len());
        for id in matching {
            self.store.delete(&id, self.clock.now())?;
            tracing::info!(%id, keywords = keywords_text, "keyword record removed");
            deleted.push(id);
        }
        Ok(deleted)
    }

    /// Change the cooldown of an existing record.
    pub fn update_delay(&self, id: &RecordId, delay_seconds: u64) -> WatchResult<()> {
        self.store.set_delay(id, delay_seconds)?;
        tracing::info!(%id, delay_seconds, "keyword record delay updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::{ExecutionError, WatchError};
    use crate::storage::InMemoryKeywordStore;
    use crate::time::SystemClock;

    fn commands(page_size: usize) -> (Commands, Arc<InMemoryKeywordStore>) {
        let store = Arc::new(InMemoryKeywordStore::new());
        (Commands::new(store.clone(), Arc::new(SystemClock), page_size), store)
    }

    #[test]
    fn add_splits_keywords_and_rejects_blank() {
        let (cmds, store) = commands(10);
        let id = cmds.add_record("urgent  deploy", ChannelRef::new("c1", "ops"), 60).unwrap();
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.keywords, vec!["urgent", "deploy"]);

        let err = cmds.add_record("   ", ChannelRef::new("c1", "ops"), 60).unwrap_err();
        assert!(matches!(err, WatchError::Validation(ValidationError::EmptyKeywords)));
    }

    #[test]
    fn remove_matches_exact_ordered_text_and_channel() {
        let (cmds, store) = commands(10);
        let a = cmds.add_record("urgent deploy", ChannelRef::new("c1", "ops"), 60).unwrap();
        let b = cmds.add_record("urgent deploy", ChannelRef::new("c1", "ops"), 30).unwrap();
        cmds.add_record("deploy urgent", ChannelRef::new("c1", "ops"), 60).unwrap();
        cmds.add_record("urgent deploy", ChannelRef::new("c2", "dev"), 60).unwrap();

        let mut deleted = cmds.remove_records("urgent deploy", "c1").unwrap();
        deleted.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(deleted, expected);

        assert_eq!(store.get_all().unwrap().len(), 2);
        assert_eq!(store.deleted_log().unwrap().len(), 2);
        assert!(cmds.remove_records("urgent", "c1").unwrap().is_empty());
    }

    #[test]
    fn list_pages_in_chunks() {
        let (cmds, _) = commands(2);
        assert_eq!(cmds.list_records(1).unwrap().total_records, 0);

        for name in ["b", "a", "c"] {
            cmds.add_record("x", ChannelRef::new(name, name), 1).unwrap();
        }
        let first = cmds.list_records(1).unwrap();
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.records[0].channel.name, "a");
        assert_eq!(first.records[1].channel.name, "b");

        let second = cmds.list_records(2).unwrap();
        assert_eq!(second.records.len(), 1);

        assert!(matches!(
            cmds.list_records(3),
            Err(WatchError::Validation(ValidationError::InvalidPage { page: 3, total_pages: 2 }))
        ));
    }

    #[test]
    fn update_delay_reports_missing_record() {
        let (cmds, store) = commands(10);
        let id = cmds.add_record("x", ChannelRef::new("c1", ""), 1).unwrap();
        cmds.update_delay(&id, 90).unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap().delay_seconds, 90);

        let err = cmds.update_delay(&RecordId::from("missing"), 5).unwrap_err();
        assert!(matches!(err, WatchError::Execution(ExecutionError::RecordNotFound { .. })));
    }
}
