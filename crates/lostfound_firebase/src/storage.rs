//! Firebase Storage through its REST endpoint.

use async_trait::async_trait;
use lostfound_common::{codes, BlobHandle, BlobStore, RemoteError};
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::debug;

use crate::client::{read_failure, transport_error, ApiFailure, FirebaseEndpoints, IdToken};

/// Object metadata returned by upload and metadata requests.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    name: String,
    /// Comma-separated list; the first token is used for public URLs
    #[serde(default)]
    download_tokens: Option<String>,
}

impl ObjectMetadata {
    fn first_token(&self) -> Option<String> {
        self.download_tokens
            .as_deref()
            .and_then(|t| t.split(',').next())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

fn storage_failure(failure: ApiFailure) -> RemoteError {
    let code = match failure.http_status {
        401 | 403 => codes::STORAGE_UNAUTHORIZED,
        404 => codes::STORAGE_OBJECT_NOT_FOUND,
        500..=599 => codes::UNAVAILABLE,
        _ => codes::STORAGE_UNKNOWN,
    };
    RemoteError::new(code, failure.message)
}

/// Blob store backed by a Firebase Storage bucket.
pub struct FirebaseStorageClient {
    http: Client,
    base_url: String,
    bucket: String,
    token: IdToken,
}

impl FirebaseStorageClient {
    pub fn new(http: Client, endpoints: &FirebaseEndpoints, token: IdToken) -> Self {
        Self {
            http,
            base_url: endpoints.storage_base_url.clone(),
            bucket: endpoints.storage_bucket.clone(),
            token,
        }
    }

    fn objects_url(&self) -> String {
        format!("{}/b/{}/o", self.base_url, self.bucket)
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.objects_url(), urlencoding::encode(path))
    }

    async fn metadata(&self, path: &str) -> Result<ObjectMetadata, RemoteError> {
        let response = self
            .token
            .authorize(self.http.get(self.object_url(path)))
            .send()
            .await
            .map_err(|e| transport_error(e, codes::UNAVAILABLE))?;
        if !response.status().is_success() {
            return Err(storage_failure(read_failure(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| RemoteError::new(codes::STORAGE_UNKNOWN, e.to_string()))
    }
}

#[async_trait]
impl BlobStore for FirebaseStorageClient {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<BlobHandle, RemoteError> {
        let size = bytes.len();
        let response = self
            .token
            .authorize(self.http.post(self.objects_url()))
            .query(&[("uploadType", "media"), ("name", path)])
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport_error(e, codes::UNAVAILABLE))?;
        if !response.status().is_success() {
            return Err(storage_failure(read_failure(response).await));
        }
        let metadata: ObjectMetadata = response
            .json()
            .await
            .map_err(|e| RemoteError::new(codes::STORAGE_UNKNOWN, e.to_string()))?;
        debug!("uploaded {} bytes to {}", size, metadata.name);
        Ok(BlobHandle {
            token: metadata.first_token(),
            path: metadata.name,
        })
    }

    async fn download_url(&self, handle: &BlobHandle) -> Result<String, RemoteError> {
        let token = match &handle.token {
            Some(token) => token.clone(),
            None => self.metadata(&handle.path).await?.first_token().ok_or_else(|| {
                RemoteError::new(
                    codes::STORAGE_UNKNOWN,
                    format!("No download token for {}", handle.path),
                )
            })?,
        };
        Ok(format!(
            "{}?alt=media&token={}",
            self.object_url(&handle.path),
            token
        ))
    }
}
