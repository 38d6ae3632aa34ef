//! `generateContent` client for a hosted multimodal model.
//!
//! Sends the screenshot inline (base64) together with an extraction prompt
//! and asks for a JSON array of `{name, quantity}` objects.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::RecognitionConfig;
use crate::errors::from_status;
use crate::retry::RetryPolicy;
use crate::{AppError, Result};

use super::{sanitize, ExtractedLine, RawLine, Recognizer};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

const EXTRACTION_PROMPT: &str = "\
You are reading a screenshot of a game inventory list.
Copy every item name exactly as printed, character for character, in the language shown.
Take the quantity from the small counter badge on the item (for example x2 or x6); use 1 when no counter is visible.
If the same item appears more than once, list it once with the quantities summed.
Do not translate, explain, or add anything.
Answer with a JSON array of objects with the fields \"name\" and \"quantity\".";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Guess the image MIME type from its magic bytes; JPEG otherwise.
#[must_use]
pub fn sniff_mime(image: &[u8]) -> &'static str {
    if image.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if image.len() >= 12 && &image[0..4] == b"RIFF" && &image[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Extract the model's JSON answer from a `generateContent` response body.
///
/// # Errors
///
/// Returns `AppError::Recognition` if the body has no text part or the text
/// is not a JSON array.
pub fn parse_response(body: &str) -> Result<Vec<ExtractedLine>> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|err| AppError::Recognition(format!("malformed response: {err}")))?;
    let text = response
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .find_map(|part| part.text)
        .ok_or_else(|| AppError::Recognition("empty response".into()))?;

    let raw: Vec<RawLine> = serde_json::from_str(text.trim())
        .map_err(|err| AppError::Recognition(format!("answer is not a JSON array: {err}")))?;
    Ok(sanitize(raw))
}

/// HTTP recognizer with its own concurrency cap and retry policy.
pub struct GeminiRecognizer {
    http: reqwest::Client,
    url: String,
    api_key: String,
    limiter: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl GeminiRecognizer {
    /// Build a recognizer from config; `api_key` must already be loaded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the key is missing or the HTTP client
    /// cannot be built.
    pub fn new(config: &RecognitionConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AppError::Config("recognition api key not loaded".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            url: format!(
                "{}/models/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_key: config.api_key.clone(),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            retry: RetryPolicy::new(config.max_attempts, config.base_backoff_ms),
        })
    }

    async fn call_once(&self, payload: &serde_json::Value) -> Result<Vec<ExtractedLine>> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|err| AppError::Recognition(format!("limiter closed: {err}")))?;

        let response = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| AppError::Recognition(format!("request failed: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AppError::Recognition(format!("body read failed: {err}")))?;
        if !status.is_success() {
            return Err(from_status(status, &body, AppError::Recognition));
        }
        parse_response(&body)
    }
}

impl Recognizer for GeminiRecognizer {
    fn recognize(&self, image: Bytes) -> BoxFuture<'_, Result<Vec<ExtractedLine>>> {
        Box::pin(async move {
            let payload = json!({
                "contents": [{
                    "parts": [
                        { "inline_data": { "mime_type": sniff_mime(&image), "data": STANDARD.encode(&image) } },
                        { "text": EXTRACTION_PROMPT }
                    ]
                }],
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "quantity": { "type": "number" }
                            },
                            "required": ["name", "quantity"]
                        }
                    }
                }
            });

            let lines = self
                .retry
                .run("recognition", || self.call_once(&payload))
                .await?;
            debug!(lines = lines.len(), bytes = image.len(), "screenshot recognized");
            Ok(lines)
        })
    }
}
