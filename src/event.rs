// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Row-level change events.
//!
//! A [`ChangeEvent`] describes one INSERT, UPDATE or DELETE observed on the
//! remote table. Transports either build events directly with the typed
//! constructors or decode the JSON wire form with [`ChangeEvent::from_json`].
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "eventType": "UPDATE",
//!   "table": "listings",
//!   "new": { "id": 42, "title": "Bike" },
//!   "old": { "id": 42 },
//!   "commit_timestamp": "2025-06-01T12:00:00.000Z"
//! }
//! ```
//!
//! Empty `new`/`old` objects are treated as absent. A DELETE whose `old`
//! object only carries the primary key (no full replica identity) decodes
//! into [`ChangeEvent::previous_id`].

use crate::error::{Result, SyncError};
use crate::pipeline::Coalesce;
use crate::record::Record;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Change operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// All change kinds, in wire order.
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];

    /// Parse a wire name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" | "DEL" => Some(ChangeKind::Delete),
            _ => None,
        }
    }

    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed change observed on the remote table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<R: Record> {
    /// Operation type
    pub kind: ChangeKind,
    /// Resource (table) the change belongs to
    pub resource: String,
    /// Record after the change (INSERT / UPDATE)
    pub current: Option<R>,
    /// Record before the change (UPDATE / DELETE, when the source sends it)
    pub previous: Option<R>,
    /// Identifier of the removed record when only the key is known (DELETE)
    pub previous_id: Option<R::Id>,
    /// When the change was committed at the source
    pub occurred_at: DateTime<Utc>,
}

impl<R: Record> ChangeEvent<R> {
    /// An INSERT of `record`.
    pub fn insert(resource: impl Into<String>, record: R) -> Self {
        Self::with_current(ChangeKind::Insert, resource, record)
    }

    /// An UPDATE producing `record`.
    pub fn update(resource: impl Into<String>, record: R) -> Self {
        Self::with_current(ChangeKind::Update, resource, record)
    }

    /// A DELETE of `record`.
    pub fn delete(resource: impl Into<String>, record: R) -> Self {
        Self {
            kind: ChangeKind::Delete,
            resource: resource.into(),
            current: None,
            previous: Some(record),
            previous_id: None,
            occurred_at: Utc::now(),
        }
    }

    /// A DELETE where only the identifier is known.
    pub fn delete_by_id(resource: impl Into<String>, id: R::Id) -> Self {
        Self {
            kind: ChangeKind::Delete,
            resource: resource.into(),
            current: None,
            previous: None,
            previous_id: Some(id),
            occurred_at: Utc::now(),
        }
    }

    fn with_current(kind: ChangeKind, resource: impl Into<String>, record: R) -> Self {
        Self {
            kind,
            resource: resource.into(),
            current: Some(record),
            previous: None,
            previous_id: None,
            occurred_at: Utc::now(),
        }
    }

    /// Attach the pre-change record.
    pub fn with_previous(mut self, previous: R) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Override the commit timestamp.
    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Identifier of the record this event targets.
    ///
    /// INSERT/UPDATE use `current` only, DELETE uses `previous` or
    /// `previous_id`. `None` means the event is unusable and the mirror
    /// ignores it.
    pub fn target_id(&self) -> Option<R::Id> {
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => self.current.as_ref().map(Record::id),
            ChangeKind::Delete => self
                .previous
                .as_ref()
                .map(Record::id)
                .or_else(|| self.previous_id.clone()),
        }
    }
}

impl<R: Record> Coalesce for ChangeEvent<R> {
    type Key = R::Id;

    fn coalesce_key(&self) -> Option<R::Id> {
        self.target_id()
    }

    /// Net effect of two changes to the same record.
    ///
    /// UPDATE and DELETE always win. A later INSERT is ignored by the mirror
    /// unless the record was deleted in between, in which case it becomes an
    /// upsert of the new row.
    fn supersede(self, next: Self) -> Self {
        match (self.kind, next.kind) {
            (_, ChangeKind::Update | ChangeKind::Delete) => next,
            (ChangeKind::Delete, ChangeKind::Insert) => Self {
                kind: ChangeKind::Update,
                ..next
            },
            (_, ChangeKind::Insert) => self,
        }
    }
}

/// Raw change payload as sent by push transports.
#[derive(Debug, Deserialize)]
struct WireChange {
    #[serde(rename = "eventType", alias = "type")]
    event_type: String,
    #[serde(default, alias = "resource")]
    table: String,
    #[serde(default, alias = "record")]
    new: Option<Value>,
    #[serde(default, alias = "old_record")]
    old: Option<Value>,
    #[serde(default)]
    commit_timestamp: Option<Value>,
}

impl<R> ChangeEvent<R>
where
    R: Record + DeserializeOwned,
    R::Id: DeserializeOwned,
{
    /// Decode a change from its JSON wire form.
    pub fn from_json(value: Value) -> Result<Self> {
        let wire: WireChange = serde_json::from_value(value)?;

        let kind = ChangeKind::parse(&wire.event_type).ok_or_else(|| {
            SyncError::EventDecode(format!("unknown eventType: {}", wire.event_type))
        })?;

        let new = non_empty(wire.new);
        let old = non_empty(wire.old);
        let occurred_at = parse_commit_timestamp(wire.commit_timestamp.as_ref());

        let mut event = match kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let new = new.ok_or_else(|| {
                    SyncError::EventDecode(format!("{} event without `new` record", kind))
                })?;
                let current: R = serde_json::from_value(new)?;
                // Partial `old` rows are common, so a failed decode is not fatal
                let previous = old.and_then(|v| serde_json::from_value::<R>(v).ok());
                Self {
                    kind,
                    resource: wire.table,
                    current: Some(current),
                    previous,
                    previous_id: None,
                    occurred_at,
                }
            }
            ChangeKind::Delete => {
                let old = old.ok_or_else(|| {
                    SyncError::EventDecode("DELETE event without `old` record".to_string())
                })?;
                match serde_json::from_value::<R>(old.clone()) {
                    Ok(previous) => Self {
                        kind,
                        resource: wire.table,
                        current: None,
                        previous: Some(previous),
                        previous_id: None,
                        occurred_at,
                    },
                    Err(_) => {
                        let id = old.get("id").cloned().ok_or_else(|| {
                            SyncError::EventDecode("DELETE `old` record has no id".to_string())
                        })?;
                        Self {
                            kind,
                            resource: wire.table,
                            current: None,
                            previous: None,
                            previous_id: Some(serde_json::from_value(id)?),
                            occurred_at,
                        }
                    }
                }
            }
        };

        if event.resource.is_empty() {
            event.resource = "unknown".to_string();
        }
        Ok(event)
    }

    /// Decode a change from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_json(value)
    }
}

fn non_empty(value: Option<Value>) -> Option<Value> {
    match value {
        Some(Value::Null) | None => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(other) => Some(other),
    }
}

/// Parse a commit timestamp (RFC 3339 string or epoch millis).
///
/// Falls back to the local clock; the timestamp is informational only.
fn parse_commit_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    match value {
        Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(timestamp = %s, error = %e, "Unparsable commit_timestamp, using local clock");
                Utc::now()
            }
        },
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now),
        _ => Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_support::Row;
    use serde_json::json;

    #[test]
    fn test_change_kind_parse() {
        assert_eq!(ChangeKind::parse("INSERT"), Some(ChangeKind::Insert));
        assert_eq!(ChangeKind::parse("update"), Some(ChangeKind::Update));
        assert_eq!(ChangeKind::parse("Delete"), Some(ChangeKind::Delete));
        assert_eq!(ChangeKind::parse("DEL"), Some(ChangeKind::Delete));
        assert_eq!(ChangeKind::parse("UPSERT"), None);
        assert_eq!(ChangeKind::parse(""), None);
    }

    #[test]
    fn test_change_kind_display_and_serde() {
        assert_eq!(ChangeKind::Insert.to_string(), "INSERT");
        let json = serde_json::to_string(&ChangeKind::ALL).unwrap();
        assert_eq!(json, r#"["INSERT","UPDATE","DELETE"]"#);
        let parsed: Vec<ChangeKind> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ChangeKind::ALL.to_vec());
    }

    #[test]
    fn test_target_id_by_kind() {
        let insert = ChangeEvent::insert("rows", Row::new(1, "a"));
        assert_eq!(insert.target_id(), Some(1));

        let update = ChangeEvent::update("rows", Row::new(2, "b")).with_previous(Row::new(2, "a"));
        assert_eq!(update.target_id(), Some(2));

        let delete = ChangeEvent::delete("rows", Row::new(3, "c"));
        assert_eq!(delete.target_id(), Some(3));

        let delete_key = ChangeEvent::<Row>::delete_by_id("rows", 4);
        assert_eq!(delete_key.target_id(), Some(4));
    }

    #[test]
    fn test_target_id_missing() {
        let event = ChangeEvent::<Row> {
            kind: ChangeKind::Delete,
            resource: "rows".to_string(),
            current: None,
            previous: None,
            previous_id: None,
            occurred_at: Utc::now(),
        };
        assert_eq!(event.target_id(), None);

        // An UPDATE carrying only the old row cannot be applied, so it has no target
        let update = ChangeEvent::<Row> {
            kind: ChangeKind::Update,
            current: None,
            ..ChangeEvent::update("rows", Row::new(5, "new")).with_previous(Row::new(5, "old"))
        };
        assert_eq!(update.target_id(), None);
    }

    #[test]
    fn test_supersede_keeps_net_effect() {
        let insert = || ChangeEvent::insert("rows", Row::new(1, "a"));
        let update = || ChangeEvent::update("rows", Row::new(1, "b"));
        let delete = || ChangeEvent::<Row>::delete_by_id("rows", 1);

        assert_eq!(insert().coalesce_key(), Some(1));
        assert_eq!(insert().supersede(update()).current, Some(Row::new(1, "b")));
        assert_eq!(update().supersede(delete()).kind, ChangeKind::Delete);

        // A second INSERT is a duplicate the mirror would ignore
        let dup = update().supersede(ChangeEvent::insert("rows", Row::new(1, "c")));
        assert_eq!(dup.kind, ChangeKind::Update);
        assert_eq!(dup.current, Some(Row::new(1, "b")));

        // Re-insert after a delete replaces the row
        let reinsert = delete().supersede(ChangeEvent::insert("rows", Row::new(1, "c")));
        assert_eq!(reinsert.kind, ChangeKind::Update);
        assert_eq!(reinsert.current, Some(Row::new(1, "c")));
    }

    #[test]
    fn test_from_json_insert() {
        let event = ChangeEvent::<Row>::from_json(json!({
            "eventType": "INSERT",
            "table": "rows",
            "new": { "id": 7, "val": "x" },
            "old": {},
            "commit_timestamp": "2025-06-01T12:00:00.000Z"
        }))
        .unwrap();

        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.resource, "rows");
        assert_eq!(event.current, Some(Row::new(7, "x")));
        assert!(event.previous.is_none());
        assert_eq!(event.occurred_at.to_rfc3339(), "2025-06-01T12:00:00+00:00");
    }

    #[test]
    fn test_from_json_update_with_partial_old() {
        let event = ChangeEvent::<Row>::from_json(json!({
            "eventType": "UPDATE",
            "table": "rows",
            "new": { "id": 7, "val": "y" },
            "old": { "id": 7 }
        }))
        .unwrap();

        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.current, Some(Row::new(7, "y")));
        // Partial old row is dropped rather than failing the event
        assert!(event.previous.is_none());
        assert_eq!(event.target_id(), Some(7));
    }

    #[test]
    fn test_from_json_delete_key_only() {
        let event = ChangeEvent::<Row>::from_json(json!({
            "eventType": "DELETE",
            "table": "rows",
            "new": {},
            "old": { "id": 9 },
            "commit_timestamp": 1_700_000_000_000i64
        }))
        .unwrap();

        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.previous.is_none());
        assert_eq!(event.previous_id, Some(9));
        assert_eq!(event.occurred_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_from_json_delete_full_row() {
        let event = ChangeEvent::<Row>::from_json(json!({
            "eventType": "DELETE",
            "table": "rows",
            "old": { "id": 9, "val": "gone" }
        }))
        .unwrap();

        assert_eq!(event.previous, Some(Row::new(9, "gone")));
        assert_eq!(event.target_id(), Some(9));
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        // Unknown event type
        let err = ChangeEvent::<Row>::from_json(json!({ "eventType": "TRUNCATE", "table": "rows" }))
            .unwrap_err();
        assert_eq!(err.kind(), "event_decode");

        // INSERT without a new record
        let err = ChangeEvent::<Row>::from_json(json!({ "eventType": "INSERT", "new": {} }))
            .unwrap_err();
        assert!(err.to_string().contains("without `new`"));

        // DELETE with neither a full row nor an id
        let err = ChangeEvent::<Row>::from_json(json!({ "eventType": "DELETE", "old": { "val": "x" } }))
            .unwrap_err();
        assert!(err.to_string().contains("no id"));

        // Missing eventType entirely
        assert!(ChangeEvent::<Row>::from_json(json!({ "table": "rows" })).is_err());
    }

    #[test]
    fn test_from_slice_invalid_json() {
        assert!(ChangeEvent::<Row>::from_slice(b"{oops").is_err());
        let ok = ChangeEvent::<Row>::from_slice(br#"{"type":"insert","resource":"rows","record":{"id":1,"val":"a"}}"#)
            .unwrap();
        assert_eq!(ok.kind, ChangeKind::Insert);
        assert_eq!(ok.resource, "rows");
    }

    #[test]
    fn test_unparsable_timestamp_falls_back() {
        let before = Utc::now();
        let event = ChangeEvent::<Row>::from_json(json!({
            "eventType": "INSERT",
            "table": "rows",
            "new": { "id": 1, "val": "a" },
            "commit_timestamp": "yesterday"
        }))
        .unwrap();
        assert!(event.occurred_at >= before);
    }
}
