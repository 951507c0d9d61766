//! Replicated document wire shape.

use crate::session::SessionId;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Local-store bookkeeping fields that never cross the sync boundary.
pub const RESERVED_FIELDS: [&str; 2] = ["_status", "_changed"];

/// The three timestamp-indexed fields a pull window ranges over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    /// When the document was first committed remotely.
    CreatedAt,
    /// When the document was last mutated remotely.
    UpdatedAt,
    /// When the document was tombstoned remotely.
    DeletedAt,
}

impl TimestampField {
    /// The field name as it appears on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            TimestampField::CreatedAt => "createdAt",
            TimestampField::UpdatedAt => "updatedAt",
            TimestampField::DeletedAt => "deletedAt",
        }
    }
}

/// A document as stored remotely.
///
/// Protocol fields are explicit; everything else a record carries lives
/// in the flattened `payload` map. Lifecycle: a create stamps
/// `created_at == updated_at` with the commit time; updates advance
/// `updated_at`; deletion sets `is_deleted` and `deleted_at` and is
/// terminal: the document stays behind as a tombstone and is never
/// physically removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedDocument {
    /// Unique, stable id within its collection.
    pub id: String,
    /// Session that performed the last write.
    pub session_id: SessionId,
    /// Remote creation time.
    pub created_at: Timestamp,
    /// Remote time of the last mutation.
    pub updated_at: Timestamp,
    /// Remote tombstoning time, once deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
    /// Whether the document is a tombstone.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_deleted: bool,
    /// Owning user, when the round runs authenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Application fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl SyncedDocument {
    /// Creates a live document stamped with `now` for both lifecycle
    /// fields.
    pub fn new(id: impl Into<String>, session_id: SessionId, now: Timestamp) -> Self {
        SyncedDocument {
            id: id.into(),
            session_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            is_deleted: false,
            user_id: None,
            payload: Map::new(),
        }
    }

    /// Sets one payload field, builder-style.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Reads one of the three indexed lifecycle fields.
    pub fn timestamp(&self, field: TimestampField) -> Option<Timestamp> {
        match field {
            TimestampField::CreatedAt => Some(self.created_at),
            TimestampField::UpdatedAt => Some(self.updated_at),
            TimestampField::DeletedAt => self.deleted_at,
        }
    }

    /// Whether the document has been tombstoned.
    pub fn is_tombstone(&self) -> bool {
        self.is_deleted
    }

    /// Removes the given fields from the payload.
    ///
    /// Protocol fields are untouched; exclusions only ever apply to
    /// application data.
    pub fn strip_fields(&mut self, fields: &BTreeSet<String>) {
        for field in fields {
            self.payload.remove(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> SyncedDocument {
        SyncedDocument::new("t1", SessionId::new("s1"), Timestamp::from_millis(100))
            .with_field("text", "todo 1")
            .with_field("color", "red")
    }

    #[test]
    fn wire_shape_is_camel_case_with_flattened_payload() {
        let value = serde_json::to_value(doc()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "t1",
                "sessionId": "s1",
                "createdAt": 100,
                "updatedAt": 100,
                "text": "todo 1",
                "color": "red",
            })
        );
    }

    #[test]
    fn tombstone_fields_serialize_when_set() {
        let mut tombstone = doc();
        tombstone.is_deleted = true;
        tombstone.deleted_at = Some(Timestamp::from_millis(200));

        let value = serde_json::to_value(tombstone).unwrap();
        assert_eq!(value["isDeleted"], json!(true));
        assert_eq!(value["deletedAt"], json!(200));
    }

    #[test]
    fn unknown_wire_fields_land_in_payload() {
        let decoded: SyncedDocument = serde_json::from_value(json!({
            "id": "t1",
            "sessionId": "s1",
            "createdAt": 100,
            "updatedAt": 150,
            "text": "todo 1",
        }))
        .unwrap();

        assert_eq!(decoded.payload.get("text"), Some(&json!("todo 1")));
        assert_eq!(decoded.updated_at, Timestamp::from_millis(150));
        assert!(!decoded.is_deleted);
    }

    #[test]
    fn strip_fields_only_touches_payload() {
        let mut document = doc();
        let exclusions: BTreeSet<String> =
            ["color".to_string(), "id".to_string()].into_iter().collect();
        document.strip_fields(&exclusions);

        assert!(document.payload.get("color").is_none());
        assert_eq!(document.payload.get("text"), Some(&json!("todo 1")));
        assert_eq!(document.id, "t1");
    }

    #[test]
    fn timestamp_accessor_covers_all_fields() {
        let mut document = doc();
        assert_eq!(
            document.timestamp(TimestampField::CreatedAt),
            Some(Timestamp::from_millis(100))
        );
        assert_eq!(document.timestamp(TimestampField::DeletedAt), None);

        document.deleted_at = Some(Timestamp::from_millis(300));
        assert_eq!(
            document.timestamp(TimestampField::DeletedAt),
            Some(Timestamp::from_millis(300))
        );
    }
}
