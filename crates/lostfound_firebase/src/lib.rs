//! Firebase adapters for the lost-and-found client.
//!
//! Implements the three service traits from `lostfound_common::services`
//! against the Firebase REST APIs:
//!
//! - [`FirebaseAuthClient`]: email/password accounts via the Identity Toolkit
//! - [`FirestoreClient`]: documents, queries and polling listeners on Cloud Firestore
//! - [`FirebaseStorageClient`]: uploads and download URLs on Firebase Storage
//!
//! # Example
//!
//! ```rust,no_run
//! use lostfound_firebase::FirebaseBackend;
//!
//! fn setup() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = lostfound_config::load_config()?;
//!     let firebase = config.firebase.clone().unwrap_or_default();
//!     let backend = FirebaseBackend::from_config(&firebase)?;
//!     // hand backend.identity, backend.store and backend.blobs to the client core
//!     # let _ = backend;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod firestore;
pub mod storage;

pub use auth::FirebaseAuthClient;
pub use client::{FirebaseEndpoints, FirebaseError, IdToken};
pub use firestore::FirestoreClient;
pub use storage::FirebaseStorageClient;

use lostfound_config::FirebaseConfig;
use std::sync::Arc;
use tracing::info;

/// The three adapters for one Firebase project, sharing an HTTP client and
/// the signed-in user's ID token.
pub struct FirebaseBackend {
    pub identity: Arc<FirebaseAuthClient>,
    pub store: Arc<FirestoreClient>,
    pub blobs: Arc<FirebaseStorageClient>,
}

impl FirebaseBackend {
    pub fn from_config(config: &FirebaseConfig) -> Result<Self, FirebaseError> {
        let endpoints = FirebaseEndpoints::from_config(config)?;
        let http = reqwest::Client::builder().build()?;
        let token = IdToken::default();
        info!("using Firebase project {}", endpoints.project_id);
        Ok(Self {
            identity: Arc::new(FirebaseAuthClient::new(http.clone(), &endpoints, token.clone())),
            store: Arc::new(FirestoreClient::new(http.clone(), &endpoints, token.clone())),
            blobs: Arc::new(FirebaseStorageClient::new(http, &endpoints, token)),
        })
    }
}
