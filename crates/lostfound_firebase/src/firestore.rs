//! Cloud Firestore through the REST v1 API.
//!
//! Writes go through `documents:commit` so one request can carry field
//! values, `REQUEST_TIME` transforms and an existence precondition. Queries
//! use `:runQuery`. The REST API has no push channel, so [`subscribe`]
//! re-runs the query every poll interval and forwards a snapshot only when
//! the result changed.
//!
//! [`subscribe`]: FirestoreClient::subscribe

use async_trait::async_trait;
use lostfound_common::{
    codes, Direction, Document, DocumentStore, DocumentWrite, FieldValue, Query, RemoteError,
    SnapshotReceiver,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{read_failure, transport_error, FirebaseEndpoints, IdToken};

/// Encodes a JSON value as a Firestore `Value`.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(values) => {
            json!({ "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

/// Decodes a Firestore `Value` into plain JSON. Timestamps, references and
/// bytes become strings.
pub fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };
    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().unwrap_or_default()),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .or_else(|| inner.as_i64())
            .map(|i| Value::Number(i.into()))
            .unwrap_or(Value::Null),
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(decode_fields(inner.get("fields"))),
        other => {
            warn!("unknown firestore value kind {}", other);
            Value::Null
        }
    }
}

pub fn decode_fields(fields: Option<&Value>) -> Map<String, Value> {
    fields
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| (k.clone(), decode_value(v)))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: Option<Value>,
}

impl RestDocument {
    fn into_document(self) -> Document {
        let id = self.name.rsplit('/').next().unwrap_or_default().to_string();
        Document::new(id, decode_fields(self.fields.as_ref()))
    }
}

#[derive(Debug, Deserialize)]
struct RunQueryRow {
    #[serde(default)]
    document: Option<RestDocument>,
}

/// Precondition attached to a commit write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precondition {
    Unconditional,
    MustExist,
    MustNotExist,
}

/// Document store backed by Cloud Firestore.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    base_url: String,
    project_id: String,
    token: IdToken,
    poll_interval: Duration,
}

impl FirestoreClient {
    pub fn new(http: Client, endpoints: &FirebaseEndpoints, token: IdToken) -> Self {
        Self {
            http,
            base_url: endpoints.firestore_base_url.clone(),
            project_id: endpoints.project_id.clone(),
            token,
            poll_interval: endpoints.poll_interval,
        }
    }

    fn database_root(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.database_root(), collection, id)
    }

    /// Builds one commit write: plain fields go into `update` (with a field
    /// mask for merges), server timestamps into `updateTransforms`.
    fn write_body(
        &self,
        collection: &str,
        id: &str,
        data: &DocumentWrite,
        merge: bool,
        precondition: Precondition,
    ) -> Value {
        let mut fields = Map::new();
        let mut mask = Vec::new();
        let mut transforms = Vec::new();
        for (field, value) in data.iter() {
            match value {
                FieldValue::Value(v) => {
                    fields.insert(field.clone(), encode_value(v));
                    mask.push(Value::String(field.clone()));
                }
                FieldValue::ServerTimestamp => transforms.push(json!({
                    "fieldPath": field,
                    "setToServerValue": "REQUEST_TIME",
                })),
            }
        }

        let mut write = json!({
            "update": {
                "name": self.document_name(collection, id),
                "fields": fields,
            }
        });
        if merge {
            write["updateMask"] = json!({ "fieldPaths": mask });
        }
        if !transforms.is_empty() {
            write["updateTransforms"] = Value::Array(transforms);
        }
        match precondition {
            Precondition::Unconditional => {}
            Precondition::MustExist => write["currentDocument"] = json!({ "exists": true }),
            Precondition::MustNotExist => write["currentDocument"] = json!({ "exists": false }),
        }
        write
    }

    async fn commit(&self, writes: Vec<Value>) -> Result<(), RemoteError> {
        let url = format!("{}/{}:commit", self.base_url, self.database_root());
        let response = self
            .token
            .authorize(self.http.post(&url))
            .json(&json!({ "writes": writes }))
            .send()
            .await
            .map_err(|e| transport_error(e, codes::UNAVAILABLE))?;
        if !response.status().is_success() {
            return Err(read_failure(response).await.into_store_error());
        }
        Ok(())
    }

    fn structured_query(query: &Query) -> Value {
        let mut structured = json!({ "from": [{ "collectionId": query.collection }] });

        let filters: Vec<Value> = query
            .filters
            .iter()
            .map(|(field, value)| {
                json!({
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": encode_value(value),
                    }
                })
            })
            .collect();
        match filters.len() {
            0 => {}
            1 => structured["where"] = filters.into_iter().next().unwrap_or_default(),
            _ => {
                structured["where"] =
                    json!({ "compositeFilter": { "op": "AND", "filters": filters } })
            }
        }

        if let Some((field, direction)) = &query.order_by {
            let direction = match direction {
                Direction::Ascending => "ASCENDING",
                Direction::Descending => "DESCENDING",
            };
            structured["orderBy"] =
                json!([{ "field": { "fieldPath": field }, "direction": direction }]);
        }
        structured
    }

    /// Starts a polling listener. Requires a tokio runtime.
    ///
    /// The first result set is delivered immediately. After that a snapshot
    /// is sent only when the result differs from the previous one. A failed
    /// poll is delivered as an error and ends the listener. Dropping the
    /// receiver stops the polling task.
    pub fn subscribe(&self, query: Query) -> SnapshotReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.clone();
        tokio::spawn(async move {
            let mut last: Option<Vec<Document>> = None;
            loop {
                match client.run_query(&query).await {
                    Ok(docs) => {
                        if last.as_ref() != Some(&docs) {
                            if tx.send(Ok(docs.clone())).is_err() {
                                break;
                            }
                            last = Some(docs);
                        }
                    }
                    Err(err) => {
                        warn!("listener on {} failed: {}", query.collection, err);
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(client.poll_interval) => {}
                }
            }
            debug!("listener on {} stopped", query.collection);
        });
        rx
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, RemoteError> {
        let url = format!("{}/{}:runQuery", self.base_url, self.database_root());
        let response = self
            .token
            .authorize(self.http.post(&url))
            .json(&json!({ "structuredQuery": Self::structured_query(query) }))
            .send()
            .await
            .map_err(|e| transport_error(e, codes::UNAVAILABLE))?;
        if !response.status().is_success() {
            return Err(read_failure(response).await.into_store_error());
        }
        let rows: Vec<RunQueryRow> = response
            .json()
            .await
            .map_err(|e| RemoteError::new(codes::UNKNOWN, e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.document.map(RestDocument::into_document))
            .collect())
    }
}

/// Auto ids in the same 20-character alphanumeric shape the SDKs use.
fn auto_id() -> String {
    Uuid::new_v4().simple().to_string()[..20].to_string()
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, RemoteError> {
        let url = format!("{}/{}", self.base_url, self.document_name(collection, id));
        let response = self
            .token
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(|e| transport_error(e, codes::UNAVAILABLE))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(read_failure(response).await.into_store_error());
        }
        let doc: RestDocument = response
            .json()
            .await
            .map_err(|e| RemoteError::new(codes::UNKNOWN, e.to_string()))?;
        Ok(Some(doc.into_document()))
    }

    async fn add(&self, collection: &str, data: DocumentWrite) -> Result<String, RemoteError> {
        let id = auto_id();
        let write = self.write_body(collection, &id, &data, false, Precondition::MustNotExist);
        self.commit(vec![write]).await?;
        Ok(id)
    }

    async fn create(&self, collection: &str, id: &str, data: DocumentWrite) -> Result<bool, RemoteError> {
        let write = self.write_body(collection, id, &data, false, Precondition::MustNotExist);
        match self.commit(vec![write]).await {
            Ok(()) => Ok(true),
            Err(err) if err.code == codes::ALREADY_EXISTS || err.code == "failed-precondition" => {
                debug!("{}/{} already exists", collection, id);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn set(&self, collection: &str, id: &str, data: DocumentWrite) -> Result<(), RemoteError> {
        let write = self.write_body(collection, id, &data, false, Precondition::Unconditional);
        self.commit(vec![write]).await
    }

    async fn update(&self, collection: &str, id: &str, data: DocumentWrite) -> Result<(), RemoteError> {
        let write = self.write_body(collection, id, &data, true, Precondition::MustExist);
        self.commit(vec![write]).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.commit(vec![json!({ "delete": self.document_name(collection, id) })])
            .await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, RemoteError> {
        self.run_query(query).await
    }

    fn subscribe(&self, query: Query) -> SnapshotReceiver {
        FirestoreClient::subscribe(self, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_codec() {
        let original = json!({
            "title": "Lost Wallet",
            "count": 3,
            "ratio": 0.5,
            "found": false,
            "tags": ["a", "b"],
            "owner": { "id": "u1" },
            "gone": null,
        });
        let encoded = encode_value(&original);
        assert_eq!(encoded["mapValue"]["fields"]["count"]["integerValue"], "3");
        assert_eq!(
            encoded["mapValue"]["fields"]["title"]["stringValue"],
            "Lost Wallet"
        );
        assert_eq!(decode_value(&encoded), original);
    }

    #[test]
    fn test_timestamps_decode_as_strings() {
        let value = json!({ "timestampValue": "2025-03-01T10:00:00.123456Z" });
        assert_eq!(decode_value(&value), json!("2025-03-01T10:00:00.123456Z"));
    }

    #[test]
    fn test_document_id_from_name() {
        let doc = RestDocument {
            name: "projects/p/databases/(default)/documents/items/abc123".into(),
            fields: Some(json!({ "title": { "stringValue": "x" } })),
        }
        .into_document();
        assert_eq!(doc.id, "abc123");
        assert_eq!(doc.data["title"], "x");
    }

    #[test]
    fn test_structured_query_shape() {
        let query = Query::collection("favorites")
            .where_eq("itemId", "i1")
            .where_eq("userId", "u1")
            .order_by("createdAt", Direction::Descending);
        let body = FirestoreClient::structured_query(&query);
        assert_eq!(body["from"][0]["collectionId"], "favorites");
        assert_eq!(body["where"]["compositeFilter"]["op"], "AND");
        assert_eq!(
            body["where"]["compositeFilter"]["filters"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert_eq!(body["orderBy"][0]["direction"], "DESCENDING");
    }
}
