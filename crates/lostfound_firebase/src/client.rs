//! Shared HTTP plumbing for the Firebase REST adapters.
//!
//! This module holds what the three adapters have in common: endpoint
//! resolution from [`FirebaseConfig`], the signed-in user's ID token that
//! authorizes Firestore and Storage requests, and the translation of Google
//! API error bodies into [`RemoteError`] codes.

use lostfound_common::{codes, RemoteError};
use lostfound_config::FirebaseConfig;
use parking_lot::RwLock;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_AUTH_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_STORAGE_BASE_URL: &str = "https://firebasestorage.googleapis.com/v0";

/// Errors that can occur while setting up the Firebase adapters
#[derive(Error, Debug)]
pub enum FirebaseError {
    /// Missing required configuration
    #[error("Missing configuration: {0}")]
    ConfigError(String),

    /// Error while building the HTTP client
    #[error("HTTP client error: {0}")]
    RequestError(#[from] reqwest::Error),
}

/// Resolved project settings shared by the adapters.
#[derive(Debug, Clone)]
pub struct FirebaseEndpoints {
    pub api_key: String,
    pub project_id: String,
    pub storage_bucket: String,
    pub auth_base_url: String,
    pub firestore_base_url: String,
    pub storage_base_url: String,
    pub poll_interval: Duration,
}

impl FirebaseEndpoints {
    /// Validates the configuration and fills in the public endpoints where
    /// no override is given.
    ///
    /// # Errors
    ///
    /// Returns [`FirebaseError::ConfigError`] when the API key, project id or
    /// storage bucket is missing or empty.
    pub fn from_config(config: &FirebaseConfig) -> Result<Self, FirebaseError> {
        fn required(value: &Option<String>, name: &str) -> Result<String, FirebaseError> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    FirebaseError::ConfigError(format!("Missing {} in FirebaseConfig", name))
                })
        }
        fn base(value: &Option<String>, default: &str) -> String {
            value
                .as_deref()
                .unwrap_or(default)
                .trim_end_matches('/')
                .to_string()
        }

        Ok(Self {
            api_key: required(&config.api_key, "api_key")?,
            project_id: required(&config.project_id, "project_id")?,
            storage_bucket: required(&config.storage_bucket, "storage_bucket")?,
            auth_base_url: base(&config.auth_base_url, DEFAULT_AUTH_BASE_URL),
            firestore_base_url: base(&config.firestore_base_url, DEFAULT_FIRESTORE_BASE_URL),
            storage_base_url: base(&config.storage_base_url, DEFAULT_STORAGE_BASE_URL),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(100)),
        })
    }
}

/// The signed-in user's ID token, written by the auth adapter and read by
/// the others.
#[derive(Debug, Clone, Default)]
pub struct IdToken(Arc<RwLock<Option<String>>>);

impl IdToken {
    pub fn get(&self) -> Option<String> {
        self.0.read().clone()
    }

    pub fn set(&self, token: Option<String>) {
        *self.0.write() = token;
    }

    /// Adds the bearer header when a user is signed in. Anonymous requests
    /// are left to the backend's security rules.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.get() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// The interesting parts of a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub http_status: u16,
    /// Google canonical status such as `NOT_FOUND`, when the body has one
    pub status: Option<String>,
    pub message: String,
}

/// Reads a non-success response into an [`ApiFailure`]. Bodies that are not
/// Google error JSON are kept verbatim as the message.
pub async fn read_failure(response: Response) -> ApiFailure {
    let http_status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    debug!("firebase request failed with {}: {}", http_status, text);
    match serde_json::from_str::<GoogleErrorBody>(&text) {
        Ok(body) => ApiFailure {
            http_status,
            status: body.error.status,
            message: body.error.message.unwrap_or_default(),
        },
        Err(_) => ApiFailure {
            http_status,
            status: None,
            message: text,
        },
    }
}

/// Maps a Google canonical status (`PERMISSION_DENIED`) to the document
/// store code (`permission-denied`).
pub fn status_code(status: &str) -> String {
    status.to_ascii_lowercase().replace('_', "-")
}

/// Fallback when the body carries no canonical status.
pub fn http_status_code(http_status: u16) -> &'static str {
    match http_status {
        400 => codes::INVALID_ARGUMENT,
        401 => codes::UNAUTHENTICATED,
        403 => codes::PERMISSION_DENIED,
        404 => codes::NOT_FOUND,
        409 => codes::ALREADY_EXISTS,
        500..=599 => codes::UNAVAILABLE,
        _ => codes::UNKNOWN,
    }
}

impl ApiFailure {
    /// Error for the document store, keyed by canonical status.
    pub fn into_store_error(self) -> RemoteError {
        let code = match &self.status {
            Some(status) => status_code(status),
            None => http_status_code(self.http_status).to_string(),
        };
        RemoteError::new(code, self.message)
    }
}

/// A request that never produced a response.
pub fn transport_error(err: reqwest::Error, code: &str) -> RemoteError {
    RemoteError::new(code, err.to_string())
}
