//! Keyword matching.
//!
//! A record matches a piece of text when every one of its keywords occurs in
//! the text as a case-insensitive substring. Matching is pure: it reads one
//! mirror snapshot and mutates nothing.

use std::sync::Arc;

use crate::error::WatchResult;
use crate::mirror::{ChangeFeedMirror, MirrorSnapshot};
use crate::record::{KeywordRecord, RecordId};

/// True iff `keywords` is non-empty and every keyword occurs in `text`,
/// ignoring case.
///
/// # Examples
///
/// ```
/// use keywatch::matcher::matches_all;
///
/// let keywords = vec!["urgent".to_string(), "deploy".to_string()];
/// assert!(matches_all(&keywords, "we need an URGENT deploy now"));
/// assert!(!matches_all(&keywords, "deploy when ready"));
/// ```
#[must_use]
pub fn matches_all(keywords: &[String], text: &str) -> bool {
    if keywords.is_empty() {
        return false;
    }
    let haystack = text.to_lowercase();
    let hits: Vec<bool> = keywords
        .iter()
        .map(|k| haystack.contains(&k.to_lowercase()))
        .collect();
    hits.iter().all(|&hit| hit)
}

/// Evaluates inbound text against the mirrored keyword records.
#[derive(Debug, Clone)]
pub struct MatchEngine {
    mirror: Arc<ChangeFeedMirror>,
}

impl MatchEngine {
    /// Creates an engine over `mirror`.
    #[must_use]
    pub fn new(mirror: Arc<ChangeFeedMirror>) -> Self {
        Self { mirror }
    }

    /// Ids of the records scoped to `channel_id` that fully match `text`,
    /// ordered by id.
    pub fn evaluate(&self, channel_id: &str, text: &str) -> WatchResult<Vec<RecordId>> {
        let snapshot = self.mirror.snapshot()?;
        Ok(Self::matches_in(&snapshot, channel_id, text)
            .into_iter()
            .map(|r| r.id.clone())
            .collect())
    }

    /// Matching records from an already taken snapshot.
    ///
    /// Callers that need further record fields (the cooldown) read them from
    /// the returned records so that every decision uses one consistent view.
    #[must_use]
    pub fn matches_in(snapshot: &MirrorSnapshot, channel_id: &str, text: &str) -> Vec<Arc<KeywordRecord>> {
        snapshot
            .for_channel(channel_id)
            .into_iter()
            .filter(|r| matches_all(&r.keywords, text))
            .collect()
    }
}
