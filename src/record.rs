//! Keyword records and their companions.
//!
//! A `KeywordRecord` binds a conjunction of keywords to one channel and a
//! cooldown. The remote collection stores the record body keyed by its id;
//! `KeywordRecordBody` is that stored shape, `KeywordRecord` is the body
//! joined with its id after validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Opaque identifier of a keyword record.
///
/// Ids are assigned once at creation and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The channel a keyword record is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Platform channel id. Immutable after creation.
    pub id: String,
    /// Display name, informational only.
    #[serde(default)]
    pub name: String,
}

impl ChannelRef {
    /// Creates a channel reference.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Stored shape of a keyword record, without its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRecordBody {
    /// Required keywords, all of which must match.
    pub keywords: Vec<String>,
    /// Channel the record is scoped to.
    pub channel: ChannelRef,
    /// Cooldown between alerts, in seconds.
    pub delay: u64,
}

impl KeywordRecordBody {
    /// Checks the body invariants: at least one keyword, no empty keyword,
    /// non-empty channel id.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.keywords.is_empty() {
            return Err(ValidationError::EmptyKeywords);
        }
        if let Some(index) = self.keywords.iter().position(|k| k.trim().is_empty()) {
            return Err(ValidationError::EmptyKeyword { index });
        }
        if self.channel.id.trim().is_empty() {
            return Err(ValidationError::EmptyChannelId);
        }
        Ok(())
    }
}

/// A validated keyword record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRecord {
    /// Record id.
    pub id: RecordId,
    /// Required keywords, all of which must match.
    pub keywords: Vec<String>,
    /// Channel the record is scoped to.
    pub channel: ChannelRef,
    /// Cooldown between alerts, in seconds.
    pub delay_seconds: u64,
}

impl KeywordRecord {
    /// Joins a stored body with its id.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if the body violates a record invariant.
    pub fn from_body(id: RecordId, body: KeywordRecordBody) -> Result<Self, ValidationError> {
        body.validate()?;
        Ok(Self {
            id,
            keywords: body.keywords,
            channel: body.channel,
            delay_seconds: body.delay,
        })
    }

    /// The stored body for this record.
    #[must_use]
    pub fn to_body(&self) -> KeywordRecordBody {
        KeywordRecordBody {
            keywords: self.keywords.clone(),
            channel: self.channel.clone(),
            delay: self.delay_seconds,
        }
    }

    /// Keywords joined by single spaces, the form operators type them in.
    #[must_use]
    pub fn keywords_text(&self) -> String {
        self.keywords.join(" ")
    }

    /// Id of the scoped channel.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel.id
    }
}

/// Entry in the append-only deleted-records log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Id of the deleted record.
    pub id: RecordId,
    /// Space-joined keyword text of the deleted record.
    pub keywords: String,
    /// When the record was deleted.
    pub deleted_at: DateTime<Utc>,
}

/// Time of the most recent alert raised for a keyword record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRecord {
    /// The keyword record this ping belongs to.
    pub keyword_record_id: RecordId,
    /// When the last alert was raised.
    pub pinged_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(keywords: &[&str]) -> KeywordRecordBody {
        KeywordRecordBody {
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            channel: ChannelRef::new("c1", "alerts"),
            delay: 60,
        }
    }

    #[test]
    fn from_body_rejects_empty_keywords() {
        let err = KeywordRecord::from_body(RecordId::from("k1"), body(&[])).unwrap_err();
        assert_eq!(err, ValidationError::EmptyKeywords);
    }

    #[test]
    fn from_body_rejects_blank_keyword() {
        let err = KeywordRecord::from_body(RecordId::from("k1"), body(&["urgent", " "])).unwrap_err();
        assert_eq!(err, ValidationError::EmptyKeyword { index: 1 });
    }

    #[test]
    fn body_wire_shape_matches_stored_layout() {
        let json = serde_json::json!({
            "keywords": ["urgent", "deploy"],
            "channel": {"id": "c1", "name": "alerts"},
            "delay": 60
        });
        let parsed: KeywordRecordBody = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, body(&["urgent", "deploy"]));

        let record = KeywordRecord::from_body(RecordId::from("k1"), parsed).unwrap();
        assert_eq!(record.keywords_text(), "urgent deploy");
        assert_eq!(record.channel_id(), "c1");
        assert_eq!(record.delay_seconds, 60);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(RecordId::generate(), RecordId::generate());
    }
}
