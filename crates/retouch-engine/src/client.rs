use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client as HttpClient, Response as HttpResponse};
use retouch_contracts::config::EditorConfig;
use retouch_contracts::image::Image;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::codec::sniff_media_type;
use crate::error::{error_chain_text, truncate_text, EditorError};

pub const EMPTY_INSTRUCTION_MESSAGE: &str = "An edit instruction is required.";

/// Something that turns an image plus an instruction into a new image.
///
/// `Ok(None)` means the service answered but produced no image.
pub trait EditService: Send + Sync + 'static {
    fn request_edit(
        &self,
        image: &Image,
        instruction: &str,
    ) -> impl Future<Output = Result<Option<Image>, EditorError>> + Send;
}

/// Edit client for Gemini's `generateContent` endpoint.
pub struct GeminiEditClient {
    api_base: String,
    model: String,
    api_key: Option<String>,
    request_timeout: Duration,
    http: HttpClient,
}

impl GeminiEditClient {
    pub fn with_http(config: &EditorConfig, http: HttpClient) -> Self {
        if config.api_key.is_none() {
            warn!("API key is not set (API_KEY, GEMINI_API_KEY or GOOGLE_API_KEY); edit requests will fail");
        }
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.trim().to_string(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
            http,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    /// One user turn: the inline image first, then the instruction, with the
    /// response restricted to image output.
    pub fn build_payload(image: &Image, instruction: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": image.media_type(),
                            "data": image.payload(),
                        }
                    },
                    { "text": instruction },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
            },
        })
    }

    /// Endpoint and request body as they would be sent, for receipts.
    pub fn describe_request(&self, image: &Image, instruction: &str) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("endpoint".to_string(), Value::String(self.endpoint()));
        out.insert("model".to_string(), Value::String(self.model.clone()));
        out.insert(
            "body".to_string(),
            Self::build_payload(image, instruction),
        );
        out
    }

    /// First inline image among the first candidate's parts, in order.
    ///
    /// A reply without a first candidate carrying `content.parts` (a blocked
    /// prompt, for one) is an error; `Ok(None)` means the parts held no image.
    pub fn extract_first_image(response_payload: &Value) -> Result<Option<Image>> {
        let Some(parts) = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
        else {
            bail!(
                "response has no candidate content (block reason: {})",
                block_reason(response_payload).unwrap_or("none")
            );
        };

        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.trim().is_empty() {
                continue;
            }
            let bytes = Image::new(data, "application/octet-stream")
                .context("inline image data is empty")?
                .decode_bytes()
                .context("inline image data is not valid base64")?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|value| !value.trim().is_empty())
                .or_else(|| sniff_media_type(&bytes))
                .context("inline image has no media type")?;
            let image = Image::new(data, mime_type).context("inline image is invalid")?;
            return Ok(Some(image));
        }

        Ok(None)
    }

    async fn send(&self, image: &Image, instruction: &str) -> Result<Option<Image>> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("API key not set; export API_KEY, GEMINI_API_KEY or GOOGLE_API_KEY");
        };
        let endpoint = self.endpoint();
        let payload = Self::build_payload(image, instruction);

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response).await?;
        let result = Self::extract_first_image(&response_payload)?;
        if result.is_none() {
            info!(
                model = %self.model,
                finish_reason = %finish_reason(&response_payload).unwrap_or("unknown"),
                block_reason = %block_reason(&response_payload).unwrap_or("none"),
                "model returned no image"
            );
        }
        Ok(result)
    }
}

impl EditService for GeminiEditClient {
    async fn request_edit(
        &self,
        image: &Image,
        instruction: &str,
    ) -> Result<Option<Image>, EditorError> {
        if instruction.trim().is_empty() {
            return Err(EditorError::Validation(EMPTY_INSTRUCTION_MESSAGE.to_string()));
        }
        match self.send(image, instruction).await {
            Ok(result) => Ok(result),
            Err(err) => {
                error!(
                    model = %self.model,
                    detail = %error_chain_text(&err, 1024),
                    "Error editing image with Gemini"
                );
                Err(EditorError::edit_service())
            }
        }
    }
}

async fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .await
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn finish_reason(payload: &Value) -> Option<&str> {
    payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str)
}

fn block_reason(payload: &Value) -> Option<&str> {
    payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::EDIT_FAILED_MESSAGE;
    use crate::test_support::{serve, test_http, StubResponse, PNG_BYTES};

    fn source() -> Image {
        Image::new("c291cmNl", "image/jpeg").unwrap_or_else(|err| panic!("{err}"))
    }

    fn client_for(base_url: &str, api_key: Option<&str>) -> GeminiEditClient {
        let mut config = EditorConfig::default().with_api_base(format!("{base_url}/v1beta"));
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }
        GeminiEditClient::with_http(&config, test_http())
    }

    fn image_response(data: &str, mime: &str) -> Value {
        json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Here you go" },
                        { "inlineData": { "mimeType": mime, "data": data } },
                    ]
                },
                "finishReason": "STOP"
            }]
        })
    }

    #[test]
    fn payload_carries_image_then_instruction() {
        let payload = GeminiEditClient::build_payload(&source(), "make it black and white");
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(payload["contents"][0]["role"], json!("user"));
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("c291cmNl"));
        assert_eq!(parts[1]["text"], json!("make it black and white"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
    }

    #[test]
    fn endpoint_accepts_prefixed_model() {
        let config = EditorConfig::default().with_model("models/gemini-3-pro-image-preview");
        let client = GeminiEditClient::with_http(&config, test_http());
        assert_eq!(
            client.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-pro-image-preview:generateContent"
        );
    }

    #[test]
    fn extracts_first_inline_part() -> anyhow::Result<()> {
        let mut payload = image_response("Zmlyc3Q=", "image/png");
        payload["candidates"][0]["content"]["parts"]
            .as_array_mut()
            .context("parts")?
            .push(json!({ "inlineData": { "mimeType": "image/jpeg", "data": "c2Vjb25k" } }));

        let image = GeminiEditClient::extract_first_image(&payload)?.context("image")?;
        assert_eq!(image.payload(), "Zmlyc3Q=");
        assert_eq!(image.media_type(), "image/png");
        Ok(())
    }

    #[test]
    fn accepts_snake_case_and_sniffs_missing_type() -> anyhow::Result<()> {
        use base64::Engine as _;
        let data = base64::engine::general_purpose::STANDARD.encode(PNG_BYTES);
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "inline_data": { "data": data } }] } }]
        });
        let image = GeminiEditClient::extract_first_image(&payload)?.context("image")?;
        assert_eq!(image.media_type(), "image/png");
        Ok(())
    }

    #[test]
    fn parts_without_inline_data_yield_none() -> anyhow::Result<()> {
        let text_only = json!({
            "candidates": [{ "content": { "parts": [{ "text": "I can't do that." }] } }]
        });
        assert_eq!(GeminiEditClient::extract_first_image(&text_only)?, None);
        let no_parts = json!({ "candidates": [{ "content": { "parts": [] } }] });
        assert_eq!(GeminiEditClient::extract_first_image(&no_parts)?, None);
        Ok(())
    }

    #[test]
    fn missing_candidate_content_is_an_error() {
        for payload in [
            json!({}),
            json!({ "candidates": [] }),
            json!({ "candidates": [{ "finishReason": "SAFETY" }] }),
            json!({ "candidates": [{ "content": { "role": "model" } }] }),
        ] {
            assert!(
                GeminiEditClient::extract_first_image(&payload).is_err(),
                "{payload}"
            );
        }
    }

    #[test]
    fn malformed_inline_data_is_an_error() {
        let payload = image_response("!!not base64!!", "image/png");
        assert!(GeminiEditClient::extract_first_image(&payload).is_err());
    }

    #[tokio::test]
    async fn request_edit_posts_to_model_endpoint() -> anyhow::Result<()> {
        let server = serve(vec![StubResponse::json(
            200,
            &image_response("ZWRpdGVk", "image/png"),
        )])
        .await?;
        let client = client_for(&server.base_url, Some("test-key"));

        let result = client
            .request_edit(&source(), "make it black and white")
            .await?
            .context("edited image")?;
        assert_eq!(result.payload(), "ZWRpdGVk");
        assert_eq!(result.media_type(), "image/png");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(
            requests[0].target,
            "/v1beta/models/gemini-2.5-flash-image:generateContent?key=test-key"
        );
        let body = requests[0].json()?;
        assert_eq!(
            body["contents"][0]["parts"][1]["text"],
            json!("make it black and white")
        );
        Ok(())
    }

    #[tokio::test]
    async fn declined_edit_is_not_an_error() -> anyhow::Result<()> {
        let server = serve(vec![StubResponse::json(
            200,
            &json!({
                "candidates": [{ "content": { "parts": [{ "text": "no" }] }, "finishReason": "SAFETY" }]
            }),
        )])
        .await?;
        let client = client_for(&server.base_url, Some("test-key"));
        assert_eq!(client.request_edit(&source(), "do it").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn blocked_prompt_is_an_edit_failure() -> anyhow::Result<()> {
        let server = serve(vec![StubResponse::json(
            200,
            &json!({ "promptFeedback": { "blockReason": "SAFETY" } }),
        )])
        .await?;
        let client = client_for(&server.base_url, Some("test-key"));
        let err = client.request_edit(&source(), "do it").await.unwrap_err();
        assert!(matches!(err, EditorError::EditService(_)), "{err:?}");
        assert_eq!(err.to_string(), EDIT_FAILED_MESSAGE);
        Ok(())
    }

    #[tokio::test]
    async fn service_failures_are_normalized() -> anyhow::Result<()> {
        let server = serve(vec![
            StubResponse::json(500, &json!({ "error": { "message": "internal detail" } })),
            StubResponse::ok("application/json", b"{not json"),
        ])
        .await?;
        let client = client_for(&server.base_url, Some("test-key"));

        for _ in 0..2 {
            let err = client.request_edit(&source(), "do it").await.unwrap_err();
            assert!(matches!(err, EditorError::EditService(_)), "{err:?}");
            assert_eq!(err.to_string(), EDIT_FAILED_MESSAGE);
        }
        assert_eq!(server.requests().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn empty_instruction_is_rejected_before_sending() -> anyhow::Result<()> {
        let server = serve(vec![]).await?;
        let client = client_for(&server.base_url, Some("test-key"));
        let err = client.request_edit(&source(), "   ").await.unwrap_err();
        assert!(matches!(err, EditorError::Validation(_)), "{err:?}");
        assert!(server.requests().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_sending() -> anyhow::Result<()> {
        let server = serve(vec![]).await?;
        let client = client_for(&server.base_url, None);
        let err = client.request_edit(&source(), "do it").await.unwrap_err();
        assert_eq!(err.to_string(), EDIT_FAILED_MESSAGE);
        assert!(server.requests().is_empty());
        Ok(())
    }

    #[test]
    fn describe_request_includes_endpoint_and_body() {
        let config = EditorConfig::default().with_api_key("k");
        let client = GeminiEditClient::with_http(&config, test_http());
        let described = client.describe_request(&source(), "sepia");
        assert!(described["endpoint"]
            .as_str()
            .unwrap_or_default()
            .ends_with("gemini-2.5-flash-image:generateContent"));
        assert_eq!(
            described["body"]["contents"][0]["parts"][1]["text"],
            json!("sepia")
        );
    }
}
