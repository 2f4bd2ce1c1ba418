//! Turns local files and remote resources into normalized [`Image`]s.

use std::path::{Path, PathBuf};

use reqwest::header::CONTENT_TYPE;
use reqwest::Client as HttpClient;
use retouch_contracts::image::{media_type_for_extension, normalize_media_type, Image, InvalidImage};
use tracing::debug;

use crate::error::EditorError;

/// A user-selected file: where it lives plus the media type it was declared
/// with, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub declared_type: Option<String>,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            declared_type: None,
        }
    }

    pub fn with_declared_type(mut self, media_type: impl Into<String>) -> Self {
        self.declared_type = Some(media_type.into());
        self
    }

    /// Declared type, else the type implied by the file extension.
    pub fn media_type(&self) -> Option<String> {
        self.declared_type
            .as_deref()
            .and_then(normalize_media_type)
            .or_else(|| media_type_for_path(&self.path).map(str::to_string))
    }
}

pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|value| value.to_str())
        .and_then(media_type_for_extension)
}

/// Media type from the leading magic bytes.
pub fn sniff_media_type(bytes: &[u8]) -> Option<String> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}

pub async fn decode_local_file(file: &LocalFile) -> Result<Image, EditorError> {
    let bytes = tokio::fs::read(&file.path).await?;
    let media_type = file
        .media_type()
        .or_else(|| sniff_media_type(&bytes))
        .ok_or(InvalidImage::MissingMediaType)?;
    debug!(
        path = %file.path.display(),
        media_type = %media_type,
        bytes = bytes.len(),
        "decoded local image"
    );
    Ok(Image::from_bytes(&bytes, media_type)?)
}

pub async fn decode_remote_resource(http: &HttpClient, url: &str) -> Result<Image, EditorError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| EditorError::network(url, err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(EditorError::network(url, format!("status {status}")));
    }
    let declared = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(normalize_media_type)
        .filter(|value| value.starts_with("image/"));
    let bytes = response
        .bytes()
        .await
        .map_err(|err| EditorError::network(url, format!("body read failed: {err}")))?;
    let media_type = declared
        .or_else(|| sniff_media_type(&bytes))
        .ok_or(InvalidImage::MissingMediaType)?;
    debug!(
        url,
        media_type = %media_type,
        bytes = bytes.len(),
        "fetched remote image"
    );
    Ok(Image::from_bytes(&bytes, media_type)?)
}
