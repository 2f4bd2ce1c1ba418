use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidImage {
    #[error("image payload is empty")]
    EmptyPayload,
    #[error("image media type is missing")]
    MissingMediaType,
    #[error("image payload is not valid base64")]
    MalformedPayload,
    #[error("not a base64 data url")]
    MalformedDataUrl,
}

/// Normalized in-memory image: base64 text of the raw bytes plus a media type tag.
///
/// Both fields are checked at construction, so an `Image` that exists always
/// has a non-empty payload and a media type. Images are replaced, never
/// mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    payload: String,
    media_type: String,
}

impl Image {
    pub fn new(
        payload: impl Into<String>,
        media_type: impl AsRef<str>,
    ) -> Result<Self, InvalidImage> {
        let payload = payload.into().trim().to_string();
        if payload.is_empty() {
            return Err(InvalidImage::EmptyPayload);
        }
        let media_type =
            normalize_media_type(media_type.as_ref()).ok_or(InvalidImage::MissingMediaType)?;
        Ok(Self {
            payload,
            media_type,
        })
    }

    pub fn from_bytes(bytes: &[u8], media_type: impl AsRef<str>) -> Result<Self, InvalidImage> {
        if bytes.is_empty() {
            return Err(InvalidImage::EmptyPayload);
        }
        Self::new(BASE64.encode(bytes), media_type)
    }

    /// Parses `data:<media type>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Result<Self, InvalidImage> {
        let rest = url
            .trim()
            .strip_prefix("data:")
            .ok_or(InvalidImage::MalformedDataUrl)?;
        let (header, payload) = rest.split_once(',').ok_or(InvalidImage::MalformedDataUrl)?;
        let media_type = header
            .strip_suffix(";base64")
            .ok_or(InvalidImage::MalformedDataUrl)?;
        Self::new(payload, media_type)
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, InvalidImage> {
        BASE64
            .decode(self.payload.as_bytes())
            .map_err(|_| InvalidImage::MalformedPayload)
    }

    /// Decoded size, computed from the base64 length without decoding.
    pub fn byte_len(&self) -> usize {
        let padding = self.payload.bytes().rev().take_while(|b| *b == b'=').count();
        ((self.payload.len() / 4) * 3).saturating_sub(padding.min(2))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.payload)
    }

    /// sha256 over the decoded bytes, falling back to the payload text when
    /// the payload is not decodable.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self.decode_bytes() {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(self.payload.as_bytes()),
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("media_type", &self.media_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Lower-cases a media type and drops parameters (`; charset=...`).
pub fn normalize_media_type(raw: &str) -> Option<String> {
    let essence = raw.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() || !essence.contains('/') {
        return None;
    }
    Some(essence.to_ascii_lowercase())
}

pub fn media_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.trim().to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

pub fn extension_for_media_type(media_type: &str) -> &'static str {
    let lowered = media_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    if lowered.contains("bmp") {
        return "bmp";
    }
    "png"
}
