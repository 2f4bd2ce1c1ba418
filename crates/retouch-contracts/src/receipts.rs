use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::image::Image;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub media_type: String,
    pub bytes: u64,
    pub sha256: String,
}

impl ImageSummary {
    pub fn of(image: &Image) -> Self {
        Self {
            media_type: image.media_type().to_string(),
            bytes: image.byte_len() as u64,
            sha256: image.fingerprint(),
        }
    }
}

/// What went in and what came out of one completed edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditReceipt {
    pub prompt: String,
    pub model: String,
    pub source: ImageSummary,
    pub result: ImageSummary,
    pub source_origin: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// On-disk layout of a receipt file.
#[derive(Debug, Serialize)]
struct ReceiptDocument {
    schema_version: u64,
    created_at: String,
    edit: Value,
    service_request: Value,
    artifacts: Artifacts,
}

#[derive(Debug, Serialize)]
struct Artifacts {
    image_path: String,
    receipt_path: String,
}

const REDACTED_KEYS: &[&str] = &["data", "payload", "image_bytes", "b64_json", "key", "api_key"];
const REDACTED: &str = "<omitted>";

pub fn build_receipt(
    receipt: &EditReceipt,
    image_path: &Path,
    receipt_path: &Path,
    service_request: &Map<String, Value>,
) -> Value {
    let document = ReceiptDocument {
        schema_version: RECEIPT_SCHEMA_VERSION,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        edit: sanitize_payload(&serde_json::to_value(receipt).unwrap_or(Value::Null)),
        service_request: sanitize_payload(&Value::Object(service_request.clone())),
        artifacts: Artifacts {
            image_path: image_path.to_string_lossy().into_owned(),
            receipt_path: receipt_path.to_string_lossy().into_owned(),
        },
    };
    serde_json::to_value(document).unwrap_or(Value::Null)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut body = serde_json::to_string_pretty(payload)?;
    body.push('\n');
    std::fs::write(path, body)?;
    Ok(())
}

/// Replaces inline image bytes and credentials with `<omitted>`, matching
/// keys case-insensitively at any depth.
pub fn sanitize_payload(value: &Value) -> Value {
    let mut cleaned = value.clone();
    redact(&mut cleaned);
    cleaned
}

fn redact(value: &mut Value) {
    match value {
        Value::Array(rows) => rows.iter_mut().for_each(redact),
        Value::Object(map) => {
            for (key, row) in map.iter_mut() {
                if REDACTED_KEYS
                    .iter()
                    .any(|redacted| key.eq_ignore_ascii_case(redacted))
                {
                    *row = Value::from(REDACTED);
                } else {
                    redact(row);
                }
            }
        }
        _ => {}
    }
}
