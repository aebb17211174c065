//! Change feed delta classification.
//!
//! Raw feed messages carry no type tag: the kind of write is implied by the
//! shape of the path and the payload. `classify` is the only place that reads
//! those shapes; everything downstream works on the tagged `Delta`.
//!
//! Rules, in priority order:
//! 1. object payload at `/<id>` once the mirror is synced: creation
//! 2. scalar payload at `/<id>/delay`: cooldown update
//! 3. absent payload at `/<id>`: deletion
//! 4. anything else: initial-sync marker
//!
//! Rule 4 also absorbs malformed deltas. They are indistinguishable from sync
//! completion and never surface as errors.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as Json;

use crate::record::{KeywordRecord, KeywordRecordBody, RecordId};
use crate::storage::FeedMessage;

/// A mutable record field carried by a field-level delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    /// New cooldown in seconds.
    Delay(u64),
}

/// A classified change feed delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// A new record appeared.
    Creation(KeywordRecord),
    /// One field of an existing record changed.
    FieldUpdate {
        /// Record being updated.
        id: RecordId,
        /// New field value.
        field: RecordField,
    },
    /// A record was removed.
    Deletion(RecordId),
    /// Initial replay finished, or an unrecognized delta.
    SyncMarker,
}

fn record_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/?([^/]+)/?$").expect("record path regex is valid"))
}

fn field_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/?([^/]+)/([^/]+)/?$").expect("field path regex is valid"))
}

/// Record id named by a top-level path (`/<id>`), if the path has that shape.
#[must_use]
pub fn top_level_id(path: &str) -> Option<RecordId> {
    record_path()
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| RecordId::from(m.as_str()))
}

/// Record id and field name of a field-level path (`/<id>/<field>`).
#[must_use]
pub fn field_target(path: &str) -> Option<(RecordId, &str)> {
    let caps = field_path().captures(path)?;
    let id = caps.get(1)?.as_str();
    let field = caps.get(2)?.as_str();
    Some((RecordId::from(id), field))
}

/// Classify one raw feed message.
///
/// `synced` is whether the mirror has already seen its initial-sync marker;
/// creations observed before that point are part of the historical replay.
#[must_use]
pub fn classify(msg: &FeedMessage, synced: bool) -> Delta {
    let data = msg.data.as_ref().filter(|v| !v.is_null());

    if let (Some(Json::Object(_)), true) = (data, synced) {
        if let Some(id) = top_level_id(&msg.path) {
            if let Some(delta) = creation(id, data) {
                return delta;
            }
        }
    }

    if let Some((id, "delay")) = field_target(&msg.path) {
        if let Some(delay) = data.and_then(delay_seconds) {
            return Delta::FieldUpdate {
                id,
                field: RecordField::Delay(delay),
            };
        }
    }

    if data.is_none() {
        if let Some(id) = top_level_id(&msg.path) {
            return Delta::Deletion(id);
        }
    }

    tracing::debug!(path = %msg.path, "unrecognized delta treated as sync marker");
    Delta::SyncMarker
}

/// Non-negative whole seconds. An integral float such as `120.0` counts.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn delay_seconds(value: &Json) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < u64::MAX as f64 {
        return Some(f as u64);
    }
    None
}

fn creation(id: RecordId, data: Option<&Json>) -> Option<Delta> {
    let body: KeywordRecordBody = match data.cloned().map(serde_json::from_value::<KeywordRecordBody>) {
        Some(Ok(body)) => body,
        Some(Err(e)) => {
            tracing::debug!(%id, error = %e, "creation payload does not parse as a record body");
            return None;
        }
        None => return None,
    };
    match KeywordRecord::from_body(id, body) {
        Ok(record) => Some(Delta::Creation(record)),
        Err(e) => {
            tracing::debug!(error = %e, "creation payload violates record invariants");
            None
        }
    }
}
