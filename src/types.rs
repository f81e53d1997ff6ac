//! Core types for the notification pipeline.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier for a user (the document id under the users collection).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// What happened to a document in the watched collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Slash-separated path of a collection, e.g. `users/alice/requestsIn`.
///
/// Validated on construction: segments are non-empty and the segment count is
/// odd (collection / document / collection / ...). The parent document id, if
/// any, identifies the owner of a per-user sub-collection.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    raw: String,
}

impl CollectionPath {
    /// Parse and validate a collection path.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let segments: Vec<&str> = raw.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PipelineError::InvalidPath(raw));
        }
        if segments.len() % 2 == 0 {
            // An even segment count addresses a document, not a collection.
            return Err(PipelineError::InvalidPath(raw));
        }
        Ok(Self { raw })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The final path segment (the collection name itself).
    pub fn leaf(&self) -> &str {
        self.raw.rsplit('/').next().unwrap_or(&self.raw)
    }

    /// The parent document id, when this is a sub-collection.
    ///
    /// `users/alice/requestsIn` → `alice`; a top-level collection has none.
    pub fn owner(&self) -> Option<UserId> {
        let segments: Vec<&str> = self.raw.split('/').collect();
        if segments.len() >= 3 {
            Some(UserId(segments[segments.len() - 2].to_string()))
        } else {
            None
        }
    }
}

impl fmt::Debug for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionPath({})", self.raw)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Document field map with validated dotted-path access.
///
/// Wraps the JSON object of a document snapshot. Dotted paths
/// (`fromUser.name`) traverse nested objects; an absent or non-traversable
/// path yields `None` rather than panicking.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldMap(serde_json::Map<String, Value>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value; `None` unless the value is an object.
    pub fn from_object(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Insert a top-level field.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a dotted path. Absent segments, blank segments, and attempts
    /// to traverse through non-objects all yield `None`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        if first.is_empty() {
            return None;
        }
        let mut current = self.0.get(first)?;
        for segment in segments {
            if segment.is_empty() {
                return None;
            }
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Look up a dotted path expecting a string value.
    pub fn str_at(&self, path: &str) -> Option<&str> {
        self.get_path(path).and_then(Value::as_str)
    }

    /// Like [`str_at`](Self::str_at) but failing with `IncompleteEvent`.
    pub fn require_str(&self, path: &str) -> Result<&str> {
        self.str_at(path).ok_or_else(|| PipelineError::incomplete(path))
    }

    /// Full-document snapshot as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Flatten the field map into string pairs with dotted keys.
    ///
    /// Nested objects recurse; scalars stringify; arrays keep their JSON
    /// text; nulls are omitted. Used for the delivery `data` map, which only
    /// carries strings.
    pub fn flatten_strings(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        flatten_into(&mut out, "", &self.0);
        out
    }
}

fn flatten_into(
    out: &mut BTreeMap<String, String>,
    prefix: &str,
    map: &serde_json::Map<String, Value>,
) {
    for (key, value) in map {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Null => {}
            Value::String(s) => {
                out.insert(full, s.clone());
            }
            Value::Bool(b) => {
                out.insert(full, b.to_string());
            }
            Value::Number(n) => {
                out.insert(full, n.to_string());
            }
            Value::Array(_) => {
                out.insert(full, value.to_string());
            }
            Value::Object(nested) => flatten_into(out, &full, nested),
        }
    }
}

/// A single mutation observed on a watched collection.
///
/// Events flow through the pipeline and are discarded after dispatch; nothing
/// here is persisted.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,

    /// The collection the document lives in.
    pub path: CollectionPath,

    /// Document id within the collection.
    pub document_id: String,

    /// Document fields at snapshot time.
    pub fields: FieldMap,

    /// Server-side creation time of the document.
    pub create_time: DateTime<Utc>,

    /// Server-side time of the last update.
    pub update_time: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        kind: ChangeKind,
        path: CollectionPath,
        document_id: impl Into<String>,
        fields: FieldMap,
        create_time: DateTime<Utc>,
        update_time: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            path,
            document_id: document_id.into(),
            fields,
            create_time,
            update_time,
        }
    }

    /// An `Added` event timestamped now. Convenient for sources and tests.
    pub fn added(path: CollectionPath, document_id: impl Into<String>, fields: FieldMap) -> Self {
        let now = Utc::now();
        Self::new(ChangeKind::Added, path, document_id, fields, now, now)
    }
}

/// An ordered batch of change events from one stream tick.
#[derive(Clone, Debug, Default)]
pub struct ChangeBatch {
    events: Vec<ChangeEvent>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ChangeEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.events.iter()
    }
}

impl From<Vec<ChangeEvent>> for ChangeBatch {
    fn from(events: Vec<ChangeEvent>) -> Self {
        Self { events }
    }
}

impl IntoIterator for ChangeBatch {
    type Item = ChangeEvent;
    type IntoIter = std::vec::IntoIter<ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_parse_valid() {
        let path = CollectionPath::parse("users/alice/requestsIn").unwrap();
        assert_eq!(path.leaf(), "requestsIn");
        assert_eq!(path.owner(), Some(UserId::from("alice")));
    }

    #[test]
    fn test_path_top_level_has_no_owner() {
        let path = CollectionPath::parse("users").unwrap();
        assert_eq!(path.leaf(), "users");
        assert_eq!(path.owner(), None);
    }

    #[test]
    fn test_path_parse_rejects_document_paths() {
        assert!(CollectionPath::parse("users/alice").is_err());
        assert!(CollectionPath::parse("users/alice/requestsIn/doc1").is_err());
    }

    #[test]
    fn test_path_parse_rejects_blank_segments() {
        assert!(CollectionPath::parse("").is_err());
        assert!(CollectionPath::parse("users//requestsIn").is_err());
        assert!(CollectionPath::parse("/users").is_err());
        assert!(CollectionPath::parse("users/alice/requestsIn/").is_err());
    }

    #[test]
    fn test_get_path_nested() {
        let fields = FieldMap::from_object(json!({
            "fromUser": {"name": "Jane Doe", "photo": "http://x/p.jpg"},
            "subject": "AP Calc BC",
        }))
        .unwrap();

        assert_eq!(fields.str_at("fromUser.name"), Some("Jane Doe"));
        assert_eq!(fields.str_at("subject"), Some("AP Calc BC"));
        assert_eq!(fields.get_path("fromUser.missing"), None);
        assert_eq!(fields.get_path("missing.name"), None);
    }

    #[test]
    fn test_get_path_does_not_traverse_scalars() {
        let fields = FieldMap::from_object(json!({"subject": "Chemistry"})).unwrap();
        assert_eq!(fields.get_path("subject.nested"), None);
    }

    #[test]
    fn test_get_path_blank_segments() {
        let fields = FieldMap::from_object(json!({"a": {"b": 1}})).unwrap();
        assert_eq!(fields.get_path(""), None);
        assert_eq!(fields.get_path("a."), None);
        assert_eq!(fields.get_path(".a"), None);
    }

    #[test]
    fn test_require_str_reports_the_path() {
        let fields = FieldMap::new();
        let err = fields.require_str("fromUser.name").unwrap_err();
        match err {
            PipelineError::IncompleteEvent { field } => assert_eq!(field, "fromUser.name"),
            other => panic!("expected IncompleteEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_to_value_round_trips_the_document() {
        let object = json!({
            "fromUser": {"name": "Jane Doe"},
            "subject": "AP Calc BC",
        });
        let fields = FieldMap::from_object(object.clone()).unwrap();
        assert_eq!(fields.to_value(), object);
    }

    #[test]
    fn test_flatten_strings() {
        let fields = FieldMap::from_object(json!({
            "subject": "AP Calc BC",
            "fromUser": {"name": "Jane Doe", "grade": 11},
            "urgent": true,
            "slots": ["Monday", "Friday"],
            "note": null,
        }))
        .unwrap();

        let flat = fields.flatten_strings();
        assert_eq!(flat.get("subject").map(String::as_str), Some("AP Calc BC"));
        assert_eq!(flat.get("fromUser.name").map(String::as_str), Some("Jane Doe"));
        assert_eq!(flat.get("fromUser.grade").map(String::as_str), Some("11"));
        assert_eq!(flat.get("urgent").map(String::as_str), Some("true"));
        assert_eq!(
            flat.get("slots").map(String::as_str),
            Some(r#"["Monday","Friday"]"#)
        );
        assert!(!flat.contains_key("note"));
    }

    #[test]
    fn test_batch_preserves_order() {
        let path = CollectionPath::parse("users/alice/requestsIn").unwrap();
        let mut batch = ChangeBatch::new();
        for i in 0..3 {
            batch.push(ChangeEvent::added(
                path.clone(),
                format!("doc{}", i),
                FieldMap::new(),
            ));
        }
        let ids: Vec<_> = batch.iter().map(|e| e.document_id.clone()).collect();
        assert_eq!(ids, vec!["doc0", "doc1", "doc2"]);
    }
}
