//! The item repository: a live mirror of `items` and `favorites`, plus the
//! owner-gated mutations.
//!
//! Mutations go to the document store first and never touch the mirror.
//! The mirror only changes when a subscription delivers a new snapshot,
//! which replaces the collection wholesale.

use lostfound_common::validation::{
    validate_date, validate_fields, validate_image, validate_item_category,
    validate_item_description, validate_item_location, validate_item_title,
};
use lostfound_common::{
    log_error, Direction, Document, DocumentStore, DocumentWrite, Favorite, Item, ItemStatus,
    LostFoundError, NewItem, Query, RemoteError, SnapshotReceiver, User, FAVORITES_COLLECTION,
    ITEMS_COLLECTION,
};
use lostfound_config::ItemConfig;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::filter::ItemFilter;
use crate::media::ImageUploader;
use crate::session::SessionManager;

/// Snapshot of the repository for consumers.
///
/// `favorites` holds every row of the join collection; the per-user view is
/// derived at read time so a user switch never leaves stale favorites.
#[derive(Debug, Clone)]
pub struct RepositoryState {
    pub items: Arc<Vec<Item>>,
    pub favorites: Arc<Vec<Favorite>>,
    pub is_loading: bool,
    pub is_uploading: bool,
}

impl Default for RepositoryState {
    fn default() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            favorites: Arc::new(Vec::new()),
            is_loading: true,
            is_uploading: false,
        }
    }
}

impl RepositoryState {
    pub fn favorites_of(&self, user_id: &str) -> impl Iterator<Item = &Favorite> {
        let user_id = user_id.to_string();
        self.favorites.iter().filter(move |f| f.user_id == user_id)
    }
}

pub struct ItemRepository {
    store: Arc<dyn DocumentStore>,
    session: Arc<SessionManager>,
    uploader: ImageUploader,
    limits: ItemConfig,
    state: Arc<watch::Sender<RepositoryState>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl ItemRepository {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<SessionManager>,
        uploader: ImageUploader,
        limits: ItemConfig,
    ) -> Self {
        let (state, _) = watch::channel(RepositoryState::default());
        Self {
            store,
            session,
            uploader,
            limits,
            state: Arc::new(state),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Opens the two collection subscriptions. Calling it again while they
    /// are open does nothing.
    pub fn start(&self) {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|h| !h.is_finished()) {
            return;
        }
        listeners.clear();
        self.state.send_modify(|s| s.is_loading = true);

        let items_rx = self.store.subscribe(
            Query::collection(ITEMS_COLLECTION).order_by("createdAt", Direction::Descending),
        );
        let favorites_rx = self.store.subscribe(Query::collection(FAVORITES_COLLECTION));

        let state = Arc::clone(&self.state);
        listeners.push(tokio::spawn(run_listener(
            items_rx,
            ITEMS_COLLECTION,
            move |items: Vec<Item>| {
                state.send_modify(|s| {
                    s.items = Arc::new(items);
                    s.is_loading = false;
                })
            },
            Arc::clone(&self.state),
        )));

        let state = Arc::clone(&self.state);
        listeners.push(tokio::spawn(run_listener(
            favorites_rx,
            FAVORITES_COLLECTION,
            move |favorites: Vec<Favorite>| {
                state.send_modify(|s| s.favorites = Arc::new(favorites))
            },
            Arc::clone(&self.state),
        )));
        info!("item repository started");
    }

    /// Closes the subscriptions. The mirror keeps its last contents.
    pub fn stop(&self) {
        let mut listeners = self.listeners.lock();
        if listeners.is_empty() {
            return;
        }
        for handle in listeners.drain(..) {
            handle.abort();
        }
        self.state.send_modify(|s| s.is_loading = false);
        info!("item repository stopped");
    }

    pub fn watch(&self) -> watch::Receiver<RepositoryState> {
        self.state.subscribe()
    }

    pub fn items(&self) -> Arc<Vec<Item>> {
        Arc::clone(&self.state.borrow().items)
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn is_uploading(&self) -> bool {
        self.state.borrow().is_uploading
    }

    pub fn get_item(&self, id: &str) -> Option<Item> {
        self.state.borrow().items.iter().find(|i| i.id == id).cloned()
    }

    pub fn is_owner(&self, item: &Item) -> bool {
        self.session
            .current_user()
            .is_some_and(|user| user.id == item.user_id)
    }

    /// The signed-in user's items, newest first.
    pub fn my_items(&self) -> Vec<Item> {
        match self.session.current_user() {
            Some(user) => self.search(&ItemFilter::new().owner(user.id)),
            None => Vec::new(),
        }
    }

    /// The signed-in user's favorite rows.
    pub fn favorites(&self) -> Vec<Favorite> {
        let Some(user) = self.session.current_user() else {
            return Vec::new();
        };
        self.state.borrow().favorites_of(&user.id).cloned().collect()
    }

    pub fn is_favorite(&self, item_id: &str) -> bool {
        let Some(user) = self.session.current_user() else {
            return false;
        };
        self.state
            .borrow()
            .favorites_of(&user.id)
            .any(|f| f.item_id == item_id)
    }

    /// Mirrored items the signed-in user has favorited, in mirror order.
    pub fn favorite_items(&self) -> Vec<Item> {
        let Some(user) = self.session.current_user() else {
            return Vec::new();
        };
        let state = self.state.borrow();
        state
            .items
            .iter()
            .filter(|item| state.favorites_of(&user.id).any(|f| f.item_id == item.id))
            .cloned()
            .collect()
    }

    pub fn search(&self, filter: &ItemFilter) -> Vec<Item> {
        self.state
            .borrow()
            .items
            .iter()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect()
    }

    /// Creates an item owned by the signed-in user and returns its id. The
    /// new item shows up in the mirror with the next snapshot.
    pub async fn add_item(&self, new_item: NewItem) -> Result<String, LostFoundError> {
        let user = self.require_user()?;
        self.validate_item(
            &new_item.title,
            new_item.description.as_deref(),
            &new_item.location,
            &new_item.date,
            new_item.image_uri.as_deref(),
            new_item.category.as_deref(),
        )?;

        let image_uri = self.prepare_image(new_item.image_uri.as_deref()).await?;
        let (user_name, user_email) = self.attribution(&user).await;

        let write = DocumentWrite::new()
            .set("title", new_item.title.trim())
            .set_optional("description", non_empty(new_item.description))
            .set("location", new_item.location.trim())
            .set("date", new_item.date.trim())
            .set_optional("imageUri", image_uri)
            .set_optional("category", non_empty(new_item.category))
            .set("userId", user.id.clone())
            .set_optional("userName", user_name)
            .set_optional("userEmail", user_email)
            .set("status", ItemStatus::Pending.as_str())
            .server_timestamp("createdAt");

        let id = self
            .store
            .add(ITEMS_COLLECTION, write)
            .await
            .map_err(|e| remote_failure(e, "add item"))?;
        info!("user {} added item {}", user.id, id);
        Ok(id)
    }

    /// Writes the editable fields of an item the signed-in user owns.
    /// Ownership comes from the mirror, never from `item.user_id`, so items
    /// not yet synced cannot be edited. Identity, attribution, status and
    /// creation time are never sent.
    pub async fn edit_item(&self, item: &Item) -> Result<(), LostFoundError> {
        let user = self.require_user()?;
        self.owned_item(&user, &item.id)?;
        self.validate_item(
            &item.title,
            item.description.as_deref(),
            &item.location,
            &item.date,
            item.image_uri.as_deref(),
            item.category.as_deref(),
        )?;

        let image_uri = self.prepare_image(item.image_uri.as_deref()).await?;
        let patch = DocumentWrite::new()
            .set("title", item.title.trim())
            .set_optional("description", item.description.clone())
            .set("location", item.location.trim())
            .set("date", item.date.trim())
            .set_optional("imageUri", image_uri)
            .set_optional("category", item.category.clone());

        self.store
            .update(ITEMS_COLLECTION, &item.id, patch)
            .await
            .map_err(|e| remote_failure(e, "edit item"))?;
        info!("user {} edited item {}", user.id, item.id);
        Ok(())
    }

    /// Deletes an item the signed-in user owns, then removes the favorite
    /// rows pointing at it. Items not yet in the mirror cannot be deleted.
    pub async fn delete_item(&self, item_id: &str) -> Result<(), LostFoundError> {
        let user = self.require_user()?;
        let item = self.owned_item(&user, item_id)?;

        self.store
            .delete(ITEMS_COLLECTION, &item.id)
            .await
            .map_err(|e| remote_failure(e, "delete item"))?;
        info!("user {} deleted item {}", user.id, item.id);

        self.remove_favorites_of(&item.id).await;
        Ok(())
    }

    /// Flips the signed-in user's favorite on an item. Returns whether the
    /// item is a favorite afterwards.
    pub async fn toggle_favorite(&self, item_id: &str) -> Result<bool, LostFoundError> {
        let user = self.require_user()?;
        let key = Favorite::key(&user.id, item_id);

        let existing = self
            .store
            .get(FAVORITES_COLLECTION, &key)
            .await
            .map_err(|e| remote_failure(e, "read favorite"))?;

        if existing.is_some() {
            self.store
                .delete(FAVORITES_COLLECTION, &key)
                .await
                .map_err(|e| remote_failure(e, "remove favorite"))?;
            debug!("user {} unfavorited {}", user.id, item_id);
            Ok(false)
        } else {
            let row = DocumentWrite::new()
                .set("userId", user.id.clone())
                .set("itemId", item_id)
                .server_timestamp("createdAt");
            self.store
                .set(FAVORITES_COLLECTION, &key, row)
                .await
                .map_err(|e| remote_failure(e, "add favorite"))?;
            debug!("user {} favorited {}", user.id, item_id);
            Ok(true)
        }
    }

    /// Owner-only status change. A found item stays found.
    pub async fn update_item_status(
        &self,
        item_id: &str,
        status: ItemStatus,
    ) -> Result<(), LostFoundError> {
        let user = self.require_user()?;
        let item = self.owned_item(&user, item_id)?;
        if item.status == ItemStatus::Found && status == ItemStatus::Pending {
            return Err(LostFoundError::Validation(
                "status: a found item cannot be reopened".to_string(),
            ));
        }
        if item.status == status {
            return Ok(());
        }

        self.store
            .update(
                ITEMS_COLLECTION,
                &item.id,
                DocumentWrite::new().set("status", status.as_str()),
            )
            .await
            .map_err(|e| remote_failure(e, "update item status"))?;
        info!("item {} marked {}", item.id, status);
        Ok(())
    }

    fn require_user(&self) -> Result<User, LostFoundError> {
        self.session
            .current_user()
            .ok_or(LostFoundError::Unauthenticated)
    }

    /// Looks the item up in the mirror and checks the caller owns it.
    fn owned_item(&self, user: &User, item_id: &str) -> Result<Item, LostFoundError> {
        let item = self
            .get_item(item_id)
            .ok_or_else(|| LostFoundError::NotFound(item_id.to_string()))?;
        if item.user_id != user.id {
            warn!("user {} is not the owner of item {}", user.id, item_id);
            return Err(LostFoundError::Unauthorized(item_id.to_string()));
        }
        Ok(item)
    }

    fn validate_item(
        &self,
        title: &str,
        description: Option<&str>,
        location: &str,
        date: &str,
        image_uri: Option<&str>,
        category: Option<&str>,
    ) -> Result<(), LostFoundError> {
        validate_fields([
            (
                "title",
                validate_item_title(
                    title,
                    self.limits.min_title_length,
                    self.limits.max_title_length,
                ),
            ),
            (
                "description",
                validate_item_description(
                    description.unwrap_or_default(),
                    self.limits.max_description_length,
                ),
            ),
            (
                "location",
                validate_item_location(location, self.limits.min_location_length),
            ),
            ("date", validate_date(date)),
            (
                "imageUri",
                validate_image(image_uri.unwrap_or_default(), None, self.limits.max_image_size),
            ),
            (
                "category",
                validate_item_category(category.unwrap_or_default(), &self.limits.categories),
            ),
        ])
        .into_result()
    }

    /// Uploads a local image, with `is_uploading` raised for the duration.
    async fn prepare_image(&self, uri: Option<&str>) -> Result<Option<String>, LostFoundError> {
        let needs_upload = uri.is_some_and(|u| {
            let u = u.trim();
            !u.is_empty() && !lostfound_common::validation::is_remote_uri(u)
        });
        if !needs_upload {
            return self.uploader.resolve(uri).await;
        }
        let _uploading = UploadFlag::raise(&self.state);
        self.uploader.resolve(uri).await
    }

    /// Owner name and email for a new item, read from the profile document
    /// when the session copy lacks them.
    async fn attribution(&self, user: &User) -> (Option<String>, Option<String>) {
        let mut name = Some(user.name.clone()).filter(|n| !n.trim().is_empty());
        let mut email = Some(user.email.clone()).filter(|e| !e.trim().is_empty());
        if name.is_none() || email.is_none() {
            match self.session.lookup_profile(&user.id).await {
                Ok(Some(profile)) => {
                    name = name.or(Some(profile.name).filter(|n| !n.is_empty()));
                    email = email.or(Some(profile.email).filter(|e| !e.is_empty()));
                }
                Ok(None) => debug!("no profile document for {}", user.id),
                Err(err) => warn!("attribution lookup failed for {}: {}", user.id, err),
            }
        }
        (name, email)
    }

    /// Best effort: failures are logged and never reach the caller.
    async fn remove_favorites_of(&self, item_id: &str) {
        let query = Query::collection(FAVORITES_COLLECTION).where_eq("itemId", item_id);
        let rows = match self.store.query(&query).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("could not list favorites of deleted item {}: {}", item_id, err);
                return;
            }
        };
        for row in rows {
            if let Err(err) = self.store.delete(FAVORITES_COLLECTION, &row.id).await {
                warn!("could not remove favorite {} of deleted item {}: {}", row.id, item_id, err);
            }
        }
    }
}

impl Drop for ItemRepository {
    fn drop(&mut self) {
        for handle in self.listeners.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Raises `is_uploading` and lowers it again when dropped, so an upload
/// error cannot leave the flag set.
struct UploadFlag<'a> {
    state: &'a watch::Sender<RepositoryState>,
}

impl<'a> UploadFlag<'a> {
    fn raise(state: &'a watch::Sender<RepositoryState>) -> Self {
        state.send_modify(|s| s.is_uploading = true);
        Self { state }
    }
}

impl Drop for UploadFlag<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|s| s.is_uploading = false);
    }
}

/// Consumes one subscription, decoding each snapshot and handing it to
/// `apply`. A listener error ends the subscription and clears the loading
/// flag; the mirror keeps its last contents.
async fn run_listener<T, F>(
    mut rx: SnapshotReceiver,
    collection: &'static str,
    apply: F,
    state: Arc<watch::Sender<RepositoryState>>,
) where
    T: DeserializeOwned,
    F: Fn(Vec<T>),
{
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Ok(docs) => {
                debug!("{} snapshot with {} documents", collection, docs.len());
                apply(decode_all(&docs, collection));
            }
            Err(err) => {
                error!("{} listener failed: {}", collection, err);
                state.send_modify(|s| s.is_loading = false);
                return;
            }
        }
    }
    debug!("{} listener closed", collection);
}

/// Decodes a snapshot, skipping documents that do not fit the record shape.
fn decode_all<T: DeserializeOwned>(docs: &[Document], collection: &str) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode() {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("skipping malformed {} document {}: {}", collection, doc.id, err);
                None
            }
        })
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn remote_failure(err: RemoteError, context: &str) -> LostFoundError {
    let mapped = LostFoundError::from_remote(err.clone());
    if mapped.is_permission_error() {
        warn!("{} rejected by access rules: {}", context, err);
    } else {
        log_error(&err, context);
    }
    mapped
}
