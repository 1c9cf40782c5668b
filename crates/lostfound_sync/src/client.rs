use lostfound_common::{BlobStore, DocumentStore, IdentityService};
use lostfound_config::AppConfig;
use std::sync::Arc;

use crate::media::ImageUploader;
use crate::repository::ItemRepository;
use crate::session::SessionManager;

/// The session manager and item repository wired to one set of services,
/// with a shared lifecycle.
pub struct LostFoundClient {
    session: Arc<SessionManager>,
    items: ItemRepository,
}

impl LostFoundClient {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        config: &AppConfig,
    ) -> Self {
        let uploader = ImageUploader::new(blobs, config);
        let session = Arc::new(
            SessionManager::new(identity, Arc::clone(&store), config.user.clone())
                .with_uploader(uploader.clone()),
        );
        let items = ItemRepository::new(store, Arc::clone(&session), uploader, config.item.clone());
        Self { session, items }
    }

    /// Starts the auth-state listener and the collection subscriptions.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.session.start();
        self.items.start();
    }

    pub fn stop(&self) {
        self.items.stop();
        self.session.stop();
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn items(&self) -> &ItemRepository {
        &self.items
    }
}
