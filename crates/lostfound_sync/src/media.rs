//! Image handling for item photos and profile pictures.
//!
//! Device-local pictures are compressed to a bounded JPEG before upload.
//! Compression is best-effort: if the bytes cannot be decoded the original
//! file is uploaded unchanged, typed by its sniffed format.

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use lostfound_common::validation::{is_remote_uri, validate_image};
use lostfound_common::{log_error, BlobStore, LostFoundError};
use lostfound_config::{AppConfig, ImageConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UNKNOWN_CONTENT_TYPE: &str = "application/octet-stream";

fn decode(bytes: &[u8]) -> Result<DynamicImage, LostFoundError> {
    image::load_from_memory(bytes).map_err(|e| LostFoundError::Image(e.to_string()))
}

fn encode_jpeg(img: &DynamicImage, quality: f32) -> Result<Vec<u8>, LostFoundError> {
    let quality = (quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8;
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        .map_err(|e| LostFoundError::Image(e.to_string()))?;
    Ok(out)
}

/// Re-encodes an image as JPEG, scaled down to fit `max_width` x
/// `max_height` with its aspect ratio kept. Smaller images keep their size.
/// `quality` is in `0.0..=1.0`.
pub fn compress_image(
    bytes: &[u8],
    max_width: u32,
    max_height: u32,
    quality: f32,
) -> Result<Vec<u8>, LostFoundError> {
    let img = decode(bytes)?;
    let img = if img.width() > max_width || img.height() > max_height {
        img.resize(max_width, max_height, FilterType::Lanczos3)
    } else {
        img
    };
    encode_jpeg(&img, quality)
}

pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), LostFoundError> {
    let img = decode(bytes)?;
    Ok((img.width(), img.height()))
}

/// Content type and file extension for bytes about to be uploaded, sniffed
/// from their magic number.
pub fn upload_format(bytes: &[u8]) -> (&'static str, &'static str) {
    match image::guess_format(bytes) {
        Ok(format) => (
            format.to_mime_type(),
            format.extensions_str().first().copied().unwrap_or("img"),
        ),
        Err(_) => (UNKNOWN_CONTENT_TYPE, "bin"),
    }
}

/// Turns image references into remote URLs, uploading local files to the
/// blob store.
#[derive(Clone)]
pub struct ImageUploader {
    blobs: Arc<dyn BlobStore>,
    items_path: String,
    profiles_path: String,
    image: ImageConfig,
    max_item_image_size: u64,
    max_profile_image_size: u64,
}

impl ImageUploader {
    pub fn new(blobs: Arc<dyn BlobStore>, config: &AppConfig) -> Self {
        Self {
            blobs,
            items_path: config.storage.items_path.clone(),
            profiles_path: config.storage.profiles_path.clone(),
            image: config.image.clone(),
            max_item_image_size: config.item.max_image_size,
            max_profile_image_size: config.user.max_profile_image_size,
        }
    }

    /// Resolves an item image reference. Empty means no image, remote URLs
    /// pass through, `file://` references are uploaded.
    pub async fn resolve(&self, uri: Option<&str>) -> Result<Option<String>, LostFoundError> {
        let uri = match uri.map(str::trim).filter(|u| !u.is_empty()) {
            Some(uri) => uri,
            None => return Ok(None),
        };
        if is_remote_uri(uri) {
            return Ok(Some(uri.to_string()));
        }
        let stem = format!(
            "{}/{}_{}",
            self.items_path,
            Utc::now().timestamp_millis(),
            random_suffix()
        );
        self.upload_local(uri, &stem, self.max_item_image_size)
            .await
            .map(Some)
    }

    /// Same as [`resolve`](Self::resolve) for a profile picture, stored
    /// under the profiles prefix.
    pub async fn resolve_profile_image(
        &self,
        user_id: &str,
        uri: &str,
    ) -> Result<Option<String>, LostFoundError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Ok(None);
        }
        if is_remote_uri(uri) {
            return Ok(Some(uri.to_string()));
        }
        let stem = format!(
            "{}/{}_{}",
            self.profiles_path,
            user_id,
            Utc::now().timestamp_millis()
        );
        self.upload_local(uri, &stem, self.max_profile_image_size)
            .await
            .map(Some)
    }

    /// Uploads a local file to `{stem}.{ext}`, the extension matching what
    /// is actually sent.
    async fn upload_local(
        &self,
        uri: &str,
        stem: &str,
        max_size: u64,
    ) -> Result<String, LostFoundError> {
        let path = local_path(uri)?;
        let original = tokio::fs::read(&path)
            .await
            .map_err(|e| LostFoundError::Image(format!("{}: {}", path.display(), e)))?;
        validate_image(uri, Some(original.len() as u64), max_size).into_result("image")?;

        let settings = self.image.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            match compress_image(&original, settings.max_width, settings.max_height, settings.quality) {
                Ok(compressed) => compressed,
                Err(err) => {
                    warn!("image compression failed, uploading original: {}", err);
                    original
                }
            }
        })
        .await
        .map_err(|e| LostFoundError::Image(e.to_string()))?;

        let (content_type, extension) = upload_format(&bytes);
        let object_path = format!("{}.{}", stem, extension);
        debug!("uploading {} bytes of {} to {}", bytes.len(), content_type, object_path);
        let handle = self
            .blobs
            .upload(&object_path, bytes, content_type)
            .await
            .map_err(|e| {
                log_error(&e, "image upload");
                LostFoundError::from_remote(e)
            })?;
        let url = self.blobs.download_url(&handle).await.map_err(|e| {
            log_error(&e, "image download url");
            LostFoundError::from_remote(e)
        })?;
        info!("uploaded image {}", handle.path);
        Ok(url)
    }
}

/// Only `file://` references can be read from here; other device schemes
/// must be copied to a file by the host first.
fn local_path(uri: &str) -> Result<PathBuf, LostFoundError> {
    match uri.strip_prefix("file://") {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Err(LostFoundError::Validation(format!(
            "image: unsupported image source {}",
            uri
        ))),
    }
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
