use retouch_contracts::image::InvalidImage;
use thiserror::Error;

pub const EDIT_FAILED_MESSAGE: &str = "Failed to edit image. The API returned an error.";

/// Failure kinds surfaced by the codec and the edit client.
///
/// `Display` is the user-safe text; detail stays in the source chain and in
/// the logs.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("failed reading image file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("{0}")]
    EditService(String),
    #[error("{0}")]
    Validation(String),
    #[error("invalid image: {0}")]
    InvalidImage(#[from] InvalidImage),
}

impl EditorError {
    pub fn network(url: &str, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn edit_service() -> Self {
        Self::EditService(EDIT_FAILED_MESSAGE.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Network { .. } => "network",
            Self::EditService(_) => "edit_service",
            Self::Validation(_) => "validation",
            Self::InvalidImage(_) => "invalid_image",
        }
    }
}

/// `a | caused by: b | caused by: c`, deduplicated and truncated.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn edit_service_error_uses_fixed_message() {
        let err = EditorError::edit_service();
        assert_eq!(err.to_string(), EDIT_FAILED_MESSAGE);
        assert_eq!(err.kind(), "edit_service");
    }

    #[test]
    fn network_error_names_url() {
        let err = EditorError::network("http://x/a.png", "status 404");
        assert_eq!(err.to_string(), "failed fetching http://x/a.png: status 404");
        assert_eq!(err.kind(), "network");
    }

    #[test]
    fn error_chain_text_dedupes_and_truncates() {
        let base: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
        let err = base
            .context("request failed")
            .context("request failed")
            .unwrap_err();
        assert_eq!(
            error_chain_text(&err, 200),
            "request failed | caused by: connection refused"
        );
        assert_eq!(error_chain_text(&err, 7), "request…");
    }
}
