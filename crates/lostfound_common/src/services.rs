//! Service abstractions for the remote collaborators.
//!
//! The session and repository layers only talk to these traits, so the
//! Firebase adapters and the in-memory implementations are interchangeable.
//! Every method returns [`RemoteError`]; classification into the local error
//! taxonomy happens in the calling layer.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};

use crate::error::RemoteError;
use crate::models::AuthUser;

/// A stored document: its id plus the schemaless field map.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self { id: id.into(), data }
    }

    /// Decodes the fields into a typed record, injecting the document id as
    /// the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut data = self.data.clone();
        data.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(data))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

/// A value in an outgoing write.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the store's clock when the write is applied.
    ServerTimestamp,
}

/// The field map of an outgoing write.
///
/// Absent optionals are omitted instead of being written as an undefined
/// marker, which the document store rejects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    fields: BTreeMap<String, FieldValue>,
}

impl DocumentWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields
            .insert(field.to_string(), FieldValue::Value(value.into()));
        self
    }

    /// Sets the field only when a value is present.
    pub fn set_optional<V: Into<Value>>(self, field: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(field, v),
            None => self,
        }
    }

    pub fn server_timestamp(mut self, field: &str) -> Self {
        self.fields
            .insert(field.to_string(), FieldValue::ServerTimestamp);
        self
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Resolves the write into plain JSON, using `now` for server timestamps.
    pub fn resolve(&self, now: &str) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    FieldValue::Value(value) => value.clone(),
                    FieldValue::ServerTimestamp => Value::String(now.to_string()),
                };
                (k.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A collection query: equality filters plus an optional single-field order.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn collection(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    /// Whether a document satisfies the filters and carries the order field.
    /// Documents without the ordering field are excluded, as the hosted
    /// store does.
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        let filters_ok = self
            .filters
            .iter()
            .all(|(field, expected)| data.get(field) == Some(expected));
        let order_ok = match &self.order_by {
            Some((field, _)) => data.get(field).is_some_and(|v| !v.is_null()),
            None => true,
        };
        filters_ok && order_ok
    }

    /// Applies filters and ordering to a full collection listing.
    pub fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        docs.retain(|d| self.matches(&d.data));
        if let Some((field, direction)) = &self.order_by {
            docs.sort_by(|a, b| {
                let ord = compare_values(a.data.get(field), b.data.get(field));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        docs
    }
}

/// Total order over JSON scalars: null < bool < number < string.
/// Timestamps are RFC 3339 strings, which sort chronologically.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

/// One delivery on a subscription: the full ordered result set, or the
/// error that ended the listener.
pub type SnapshotResult = Result<Vec<Document>, RemoteError>;

/// Receiving side of a subscription. Dropping it unsubscribes.
pub type SnapshotReceiver = mpsc::UnboundedReceiver<SnapshotResult>;

/// A hosted, schemaless document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one document; `Ok(None)` when it does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, RemoteError>;

    /// Creates a document with a store-generated id and returns the id.
    async fn add(&self, collection: &str, data: DocumentWrite) -> Result<String, RemoteError>;

    /// Creates the document only if no document with this id exists.
    /// Returns `false` when it already existed; nothing is written then.
    async fn create(&self, collection: &str, id: &str, data: DocumentWrite) -> Result<bool, RemoteError>;

    /// Writes the document, replacing any existing fields.
    async fn set(&self, collection: &str, id: &str, data: DocumentWrite) -> Result<(), RemoteError>;

    /// Merges the given fields into an existing document. Fails with
    /// `not-found` if the document does not exist.
    async fn update(&self, collection: &str, id: &str, data: DocumentWrite) -> Result<(), RemoteError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, RemoteError>;

    /// Opens a listener. The current result set is delivered first, then a
    /// full snapshot after every change.
    fn subscribe(&self, query: Query) -> SnapshotReceiver;
}

/// Handle to an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    pub path: String,
    /// Access token for building the public URL, where the store uses one
    pub token: Option<String>,
}

/// Object storage addressed by caller-chosen paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<BlobHandle, RemoteError>;

    async fn download_url(&self, handle: &BlobHandle) -> Result<String, RemoteError>;
}

/// The managed identity service.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Creates an account and signs it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, RemoteError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, RemoteError>;

    async fn sign_out(&self) -> Result<(), RemoteError>;

    /// Updates the display profile of the signed-in principal. `None`
    /// fields are left unchanged.
    async fn update_profile(
        &self,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<(), RemoteError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), RemoteError>;

    fn current_user(&self) -> Option<AuthUser>;

    /// Stream of the signed-in principal; a new value on every change.
    fn auth_state(&self) -> watch::Receiver<Option<AuthUser>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: Value) -> Document {
        Document::new(id, value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_document_write_omits_none() {
        let write = DocumentWrite::new()
            .set("title", "Lost Wallet")
            .set_optional::<String>("imageUri", None)
            .set_optional("category", Some("Other"))
            .server_timestamp("createdAt");

        assert!(!write.contains("imageUri"));
        assert!(write.contains("category"));
        assert_eq!(write.get("createdAt"), Some(&FieldValue::ServerTimestamp));

        let resolved = write.resolve("2025-03-01T00:00:00Z");
        assert_eq!(resolved["createdAt"], "2025-03-01T00:00:00Z");
        assert_eq!(resolved.len(), 3);
    }

    #[test]
    fn test_query_orders_descending_and_filters() {
        let docs = vec![
            doc("a", json!({"userId": "u1", "createdAt": "2025-01-01T00:00:00Z"})),
            doc("b", json!({"userId": "u2", "createdAt": "2025-01-03T00:00:00Z"})),
            doc("c", json!({"userId": "u1", "createdAt": "2025-01-02T00:00:00Z"})),
            doc("d", json!({"userId": "u1"})),
        ];

        let ordered = Query::collection("items")
            .order_by("createdAt", Direction::Descending)
            .apply(docs.clone());
        let ids: Vec<_> = ordered.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let mine = Query::collection("items").where_eq("userId", "u1").apply(docs);
        assert_eq!(mine.len(), 3);
    }

    #[test]
    fn test_decode_injects_id() {
        #[derive(serde::Deserialize)]
        struct Row {
            id: String,
            n: i64,
        }
        let row: Row = doc("x1", json!({"n": 4})).decode().unwrap();
        assert_eq!(row.id, "x1");
        assert_eq!(row.n, 4);
    }
}
