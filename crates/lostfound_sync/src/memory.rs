//! In-memory implementations of the remote service traits.
//!
//! They behave like the hosted services closely enough to drive the session
//! and repository layers offline: generated ids, server timestamps,
//! conditional creates, full-snapshot listeners. Test hooks let callers hold
//! snapshot delivery, inject failures, and inspect every write.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use lostfound_common::error::codes;
use lostfound_common::{
    AuthUser, BlobHandle, BlobStore, Document, DocumentStore, DocumentWrite, IdentityService,
    Query, RemoteError, SnapshotReceiver,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::{mpsc, watch, Notify};
use tracing::debug;
use uuid::Uuid;

/// Store operations, used for failure injection and the write log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Add,
    Create,
    Set,
    Update,
    Delete,
    Query,
}

/// One applied write, as seen by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub op: StoreOp,
    pub collection: String,
    pub id: String,
    /// Field map after server values were resolved; empty for deletes
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct FailureRule {
    op: StoreOp,
    collection: String,
    error: RemoteError,
}

struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<lostfound_common::SnapshotResult>,
}

#[derive(Default)]
struct StoreInner {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    listeners: Vec<Listener>,
    hold: bool,
    dirty: BTreeSet<String>,
    failures: Vec<FailureRule>,
    writes: Vec<WriteRecord>,
    last_timestamp: Option<DateTime<Utc>>,
    delayed_read: Option<String>,
}

impl StoreInner {
    fn check(&self, op: StoreOp, collection: &str) -> Result<(), RemoteError> {
        match self
            .failures
            .iter()
            .find(|f| f.op == op && f.collection == collection)
        {
            Some(rule) => Err(rule.error.clone()),
            None => Ok(()),
        }
    }

    /// Strictly increasing server clock, so ordering by timestamp is total.
    fn server_now(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn snapshot(&self, query: &Query) -> Vec<Document> {
        let docs = self
            .collections
            .get(&query.collection)
            .map(|c| {
                c.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default();
        query.apply(docs)
    }

    fn changed(&mut self, collection: &str) {
        if self.hold {
            self.dirty.insert(collection.to_string());
            return;
        }
        self.notify(collection);
    }

    fn notify(&mut self, collection: &str) {
        let snapshots: Vec<Option<Vec<Document>>> = self
            .listeners
            .iter()
            .map(|l| (l.query.collection == collection).then(|| self.snapshot(&l.query)))
            .collect();
        let mut keep = Vec::with_capacity(self.listeners.len());
        for (listener, snapshot) in self.listeners.drain(..).zip(snapshots) {
            let alive = match snapshot {
                Some(docs) => listener.tx.send(Ok(docs)).is_ok(),
                None => !listener.tx.is_closed(),
            };
            if alive {
                keep.push(listener);
            }
        }
        self.listeners = keep;
    }

    fn record(&mut self, op: StoreOp, collection: &str, id: &str, data: Map<String, Value>) {
        self.writes.push(WriteRecord {
            op,
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
    }
}

/// A document store held entirely in memory.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    inner: Mutex<StoreInner>,
    read_gate: Notify,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue snapshot deliveries instead of sending them, until
    /// [`release_deliveries`](Self::release_deliveries).
    pub fn hold_deliveries(&self) {
        self.inner.lock().hold = true;
    }

    /// Deliver one snapshot per collection changed while held.
    pub fn release_deliveries(&self) {
        let mut inner = self.inner.lock();
        inner.hold = false;
        let dirty = std::mem::take(&mut inner.dirty);
        for collection in dirty {
            inner.notify(&collection);
        }
    }

    /// Make every `op` on `collection` fail with `error` until cleared.
    pub fn fail_on(&self, op: StoreOp, collection: &str, error: RemoteError) {
        self.inner.lock().failures.push(FailureRule {
            op,
            collection: collection.to_string(),
            error,
        });
    }

    /// The next `get` on `collection` reads its document immediately but
    /// returns only after [`release_read`](Self::release_read).
    pub fn delay_next_read(&self, collection: &str) {
        self.inner.lock().delayed_read = Some(collection.to_string());
    }

    pub fn release_read(&self) {
        self.read_gate.notify_one();
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    /// Push an error to every listener on `collection` and close them, the
    /// way a hosted listener ends after a permission or network failure.
    pub fn break_listeners(&self, collection: &str, error: RemoteError) {
        let mut inner = self.inner.lock();
        inner.listeners.retain(|l| {
            if l.query.collection == collection {
                let _ = l.tx.send(Err(error.clone()));
                false
            } else {
                true
            }
        });
    }

    /// Every write applied so far, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.inner.lock().writes.clone()
    }

    pub fn listener_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.listeners.retain(|l| !l.tx.is_closed());
        inner.listeners.len()
    }

    /// Current contents of a collection, ordered by id.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner.lock().snapshot(&Query::collection(collection))
    }

    /// Writes a document directly, bypassing failure rules, as another
    /// client would. Listeners are notified.
    pub fn insert_raw(&self, collection: &str, id: &str, data: Map<String, Value>) {
        let mut inner = self.inner.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        inner.changed(collection);
    }
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()[..20].to_string()
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, RemoteError> {
        let (doc, delayed) = {
            let mut inner = self.inner.lock();
            inner.check(StoreOp::Get, collection)?;
            let doc = inner
                .collections
                .get(collection)
                .and_then(|c| c.get(id))
                .map(|data| Document::new(id, data.clone()));
            let delayed = inner.delayed_read.as_deref() == Some(collection);
            if delayed {
                inner.delayed_read = None;
            }
            (doc, delayed)
        };
        if delayed {
            self.read_gate.notified().await;
        }
        Ok(doc)
    }

    async fn add(&self, collection: &str, data: DocumentWrite) -> Result<String, RemoteError> {
        let mut inner = self.inner.lock();
        inner.check(StoreOp::Add, collection)?;
        let id = generate_id();
        let now = inner.server_now();
        let resolved = data.resolve(&now);
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), resolved.clone());
        inner.record(StoreOp::Add, collection, &id, resolved);
        inner.changed(collection);
        debug!("memory store: added {}/{}", collection, id);
        Ok(id)
    }

    async fn create(&self, collection: &str, id: &str, data: DocumentWrite) -> Result<bool, RemoteError> {
        let mut inner = self.inner.lock();
        inner.check(StoreOp::Create, collection)?;
        let exists = inner
            .collections
            .get(collection)
            .is_some_and(|c| c.contains_key(id));
        if exists {
            return Ok(false);
        }
        let now = inner.server_now();
        let resolved = data.resolve(&now);
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), resolved.clone());
        inner.record(StoreOp::Create, collection, id, resolved);
        inner.changed(collection);
        Ok(true)
    }

    async fn set(&self, collection: &str, id: &str, data: DocumentWrite) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.check(StoreOp::Set, collection)?;
        let now = inner.server_now();
        let resolved = data.resolve(&now);
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), resolved.clone());
        inner.record(StoreOp::Set, collection, id, resolved);
        inner.changed(collection);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, data: DocumentWrite) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.check(StoreOp::Update, collection)?;
        let now = inner.server_now();
        let resolved = data.resolve(&now);
        let doc = inner
            .collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| RemoteError::not_found(format!("No document to update: {}/{}", collection, id)))?;
        for (k, v) in resolved.clone() {
            doc.insert(k, v);
        }
        inner.record(StoreOp::Update, collection, id, resolved);
        inner.changed(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.check(StoreOp::Delete, collection)?;
        // deleting a missing document is not an error
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|c| c.remove(id))
            .is_some();
        inner.record(StoreOp::Delete, collection, id, Map::new());
        if removed {
            inner.changed(collection);
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, RemoteError> {
        let inner = self.inner.lock();
        inner.check(StoreOp::Query, &query.collection)?;
        Ok(inner.snapshot(query))
    }

    fn subscribe(&self, query: Query) -> SnapshotReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let _ = tx.send(Ok(inner.snapshot(&query)));
        inner.listeners.push(Listener { query, tx });
        rx
    }
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    email: String,
    password: String,
    display_name: Option<String>,
    photo_url: Option<String>,
}

impl Account {
    fn principal(&self) -> AuthUser {
        AuthUser {
            uid: self.uid.clone(),
            email: Some(self.email.clone()),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
        }
    }
}

#[derive(Default)]
struct IdentityInner {
    // keyed by lower-cased email
    accounts: HashMap<String, Account>,
    offline: bool,
    reset_requests: Vec<String>,
}

/// An identity service backed by an in-memory account table.
pub struct InMemoryIdentityService {
    inner: Mutex<IdentityInner>,
    state: watch::Sender<Option<AuthUser>>,
    min_password_length: usize,
}

impl Default for InMemoryIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdentityService {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Mutex::new(IdentityInner::default()),
            state,
            min_password_length: 6,
        }
    }

    /// Simulate losing the network: every call fails with
    /// `auth/network-request-failed`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Emails that password reset mails were sent to.
    pub fn reset_requests(&self) -> Vec<String> {
        self.inner.lock().reset_requests.clone()
    }

    pub fn account_count(&self) -> usize {
        self.inner.lock().accounts.len()
    }

    /// Publishes a principal without a credential check, as a restored
    /// session would.
    pub fn restore_session(&self, user: Option<AuthUser>) {
        self.state.send_replace(user);
    }

    fn ensure_online(inner: &IdentityInner) -> Result<(), RemoteError> {
        if inner.offline {
            return Err(RemoteError::new(codes::AUTH_NETWORK, "Network request failed"));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentityService {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, RemoteError> {
        let principal = {
            let mut inner = self.inner.lock();
            Self::ensure_online(&inner)?;
            let key = email.trim().to_lowercase();
            if !key.contains('@') {
                return Err(RemoteError::new(codes::AUTH_INVALID_EMAIL, "INVALID_EMAIL"));
            }
            if inner.accounts.contains_key(&key) {
                return Err(RemoteError::new(codes::AUTH_EMAIL_IN_USE, "EMAIL_EXISTS"));
            }
            if password.chars().count() < self.min_password_length {
                return Err(RemoteError::new(codes::AUTH_WEAK_PASSWORD, "WEAK_PASSWORD"));
            }
            let account = Account {
                uid: Uuid::new_v4().simple().to_string(),
                email: email.trim().to_string(),
                password: password.to_string(),
                display_name: None,
                photo_url: None,
            };
            let principal = account.principal();
            inner.accounts.insert(key, account);
            principal
        };
        self.state.send_replace(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, RemoteError> {
        let principal = {
            let inner = self.inner.lock();
            Self::ensure_online(&inner)?;
            match inner.accounts.get(&email.trim().to_lowercase()) {
                Some(account) if account.password == password => account.principal(),
                _ => {
                    return Err(RemoteError::new(
                        codes::AUTH_INVALID_CREDENTIAL,
                        "INVALID_LOGIN_CREDENTIALS",
                    ))
                }
            }
        };
        self.state.send_replace(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        Self::ensure_online(&self.inner.lock())?;
        self.state.send_replace(None);
        Ok(())
    }

    async fn update_profile(
        &self,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<(), RemoteError> {
        let current = self
            .current_user()
            .ok_or_else(|| RemoteError::new(codes::AUTH_NO_SESSION, "No signed-in user"))?;
        let principal = {
            let mut inner = self.inner.lock();
            Self::ensure_online(&inner)?;
            let account = inner
                .accounts
                .values_mut()
                .find(|a| a.uid == current.uid)
                .ok_or_else(|| RemoteError::new(codes::AUTH_USER_NOT_FOUND, "USER_NOT_FOUND"))?;
            if let Some(name) = display_name {
                account.display_name = Some(name.to_string());
            }
            if let Some(url) = photo_url {
                account.photo_url = Some(url.to_string());
            }
            account.principal()
        };
        self.state.send_replace(Some(principal));
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        Self::ensure_online(&inner)?;
        let key = email.trim().to_lowercase();
        if !inner.accounts.contains_key(&key) {
            return Err(RemoteError::new(codes::AUTH_USER_NOT_FOUND, "EMAIL_NOT_FOUND"));
        }
        inner.reset_requests.push(key);
        Ok(())
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    fn auth_state(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }
}

#[derive(Default)]
struct BlobInner {
    objects: HashMap<String, (Vec<u8>, String)>,
    fail_uploads: Option<RemoteError>,
}

/// Object storage held in memory. URLs are `{base_url}/{path}`.
pub struct InMemoryBlobStore {
    base_url: String,
    inner: Mutex<BlobInner>,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new("https://blobs.invalid")
    }
}

impl InMemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            inner: Mutex::new(BlobInner::default()),
        }
    }

    pub fn fail_uploads(&self, error: Option<RemoteError>) {
        self.inner.lock().fail_uploads = error;
    }

    /// Stored bytes and content type for a path.
    pub fn object(&self, path: &str) -> Option<(Vec<u8>, String)> {
        self.inner.lock().objects.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.inner.lock().objects.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<BlobHandle, RemoteError> {
        let mut inner = self.inner.lock();
        if let Some(err) = &inner.fail_uploads {
            return Err(err.clone());
        }
        inner
            .objects
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(BlobHandle {
            path: path.to_string(),
            token: None,
        })
    }

    async fn download_url(&self, handle: &BlobHandle) -> Result<String, RemoteError> {
        if !self.inner.lock().objects.contains_key(&handle.path) {
            return Err(RemoteError::new(
                codes::STORAGE_OBJECT_NOT_FOUND,
                format!("No object at {}", handle.path),
            ));
        }
        Ok(format!("{}/{}", self.base_url, handle.path))
    }
}
