// --- File: crates/lostfound_common/src/lib.rs ---

// Declare modules within this crate
pub mod error; // Error taxonomy and message table
pub mod logging; // Logging utilities
pub mod models; // Items, favorites, profiles
pub mod services; // Remote collaborator traits
pub mod validation; // Field validators

// Re-export error types and utilities for easier access
pub use error::{codes, config_error, messages, validation_error, LostFoundError, RemoteError};

// Re-export the data model
pub use models::{
    AuthUser, Favorite, Item, ItemCategory, ItemStatus, NewItem, ProfileUpdate, User,
    FAVORITES_COLLECTION, ITEMS_COLLECTION, USERS_COLLECTION,
};

// Re-export the service seams
pub use services::{
    BlobHandle, BlobStore, Direction, Document, DocumentStore, DocumentWrite, FieldValue,
    IdentityService, Query, SnapshotReceiver, SnapshotResult,
};

// Re-export logging utilities for easier access
pub use logging::{init, init_with_level, log_error, log_result};

// Shared models, errors, validators and service traits used by the
// session/repository core and by the backend adapters.
