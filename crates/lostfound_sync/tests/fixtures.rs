//! Shared fixtures for the session and repository tests.
//!
//! A [`Harness`] wires a started [`LostFoundClient`] to the in-memory
//! services and keeps handles to them for inspection.
#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lostfound_common::{NewItem, User};
use lostfound_config::AppConfig;
use lostfound_sync::memory::{InMemoryBlobStore, InMemoryDocumentStore, InMemoryIdentityService};
use lostfound_sync::{LostFoundClient, RepositoryState, SessionState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const PASSWORD: &str = "secret1";

pub struct Harness {
    pub identity: Arc<InMemoryIdentityService>,
    pub store: Arc<InMemoryDocumentStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub client: LostFoundClient,
}

impl Harness {
    /// A started client over fresh in-memory services.
    pub fn new() -> Self {
        let identity = Arc::new(InMemoryIdentityService::new());
        let store = Arc::new(InMemoryDocumentStore::new());
        let blobs = Arc::new(InMemoryBlobStore::default());
        let client = LostFoundClient::new(
            identity.clone(),
            store.clone(),
            blobs.clone(),
            &AppConfig::default(),
        );
        client.start();
        Self {
            identity,
            store,
            blobs,
            client,
        }
    }

    /// Registers an account and logs it in, returning the session user.
    pub async fn sign_in_new_user(&self, name: &str, email: &str, student_id: &str) -> User {
        let session = self.client.session();
        session
            .register(name, email, PASSWORD, student_id)
            .await
            .expect("register");
        assert!(session.login(email, PASSWORD).await.expect("login"));
        session.current_user().expect("signed in")
    }

    /// Logs out and back in as another existing account.
    pub async fn switch_to(&self, email: &str) -> User {
        let session = self.client.session();
        session.logout().await.expect("logout");
        assert!(session.login(email, PASSWORD).await.expect("login"));
        session.current_user().expect("signed in")
    }

    /// Waits until the repository state satisfies `check`.
    pub async fn items_until<F>(&self, check: F) -> RepositoryState
    where
        F: Fn(&RepositoryState) -> bool,
    {
        let mut rx = self.client.items().watch();
        let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| check(s)))
            .await
            .expect("repository state not reached in time")
            .expect("repository dropped")
            .clone();
        state
    }

    /// Waits until the session state satisfies `check`.
    pub async fn session_until<F>(&self, check: F) -> SessionState
    where
        F: Fn(&SessionState) -> bool,
    {
        let mut rx = self.client.session().watch();
        let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| check(s)))
            .await
            .expect("session state not reached in time")
            .expect("session dropped")
            .clone();
        state
    }
}

pub fn wallet() -> NewItem {
    NewItem::new("Lost Wallet", "Gym", "2025-03-01")
}

/// Writes a solid-colour PNG to `dir` and returns its `file://` URI.
pub fn png_file(dir: &Path, width: u32, height: u32) -> String {
    let path: PathBuf = dir.join("photo.png");
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 120, 200])))
        .save_with_format(&path, ImageFormat::Png)
        .expect("write png");
    format!("file://{}", path.display())
}

/// Lets spawned listener tasks run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
