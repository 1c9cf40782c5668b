//! Client core of the campus lost-and-found app.
//!
//! [`SessionManager`] follows the identity service and owns the signed-in
//! user's profile. [`ItemRepository`] mirrors the `items` and `favorites`
//! collections through live subscriptions and gates every mutation on
//! ownership. Both talk to the remote services only through the traits in
//! `lostfound_common::services`, so the Firebase adapters and the in-memory
//! services in [`memory`] are interchangeable.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lostfound_sync::memory::{InMemoryBlobStore, InMemoryDocumentStore, InMemoryIdentityService};
//! use lostfound_sync::LostFoundClient;
//!
//! # async fn run() -> Result<(), lostfound_common::LostFoundError> {
//! let config = lostfound_config::AppConfig::default();
//! let client = LostFoundClient::new(
//!     Arc::new(InMemoryIdentityService::new()),
//!     Arc::new(InMemoryDocumentStore::new()),
//!     Arc::new(InMemoryBlobStore::default()),
//!     &config,
//! );
//! client.start();
//! client.session().login("jane@u.edu", "secret1").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod filter;
pub mod media;
pub mod memory;
pub mod repository;
pub mod session;

pub use client::LostFoundClient;
pub use filter::ItemFilter;
pub use media::{compress_image, image_dimensions, upload_format, ImageUploader};
pub use repository::{ItemRepository, RepositoryState};
pub use session::{SessionManager, SessionState};
