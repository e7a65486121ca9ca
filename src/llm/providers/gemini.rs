//! Google Gemini provider (`models/{model}:generateContent`).
//!
//! Exposes a single `generate(&str) -> LlmResponse` interface matching the
//! rest of the `LlmProvider` abstraction. All Gemini wire types are private to
//! this module. The provider is stateless: each call is one single-turn
//! round-trip, conversation history stays with the session.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::config::GeminiConfig;
use crate::llm::{ApiKey, LlmResponse, LlmUsage, ProviderError};

const API_KEY_HEADER: &str = "x-goog-api-key";

// ── Public provider ───────────────────────────────────────────────────────────

/// Constructed once at startup, then cheaply cloned because
/// `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    system_instruction: Option<String>,
    api_key: ApiKey,
}

impl GeminiProvider {
    pub fn new(config: &GeminiConfig, api_key: ApiKey) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds.min(10)))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/{}:generateContent", config.api_base_url, config.model),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            system_instruction: config.system_instruction.clone(),
            api_key,
        })
    }

    #[cfg(test)]
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `prompt` as a single user turn.
    pub async fn generate(&self, prompt: &str) -> Result<LlmResponse, ProviderError> {
        let payload = self.request_body(prompt);

        debug!(
            model = %self.model,
            temperature = self.temperature,
            prompt_len = prompt.len(),
            "sending Gemini request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full Gemini request payload");
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, self.api_key.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, timeout = e.is_timeout(), error = %e, "Gemini HTTP request failed (transport)");
                if e.is_timeout() {
                    ProviderError::Request("request timed out".into())
                } else {
                    ProviderError::Request(format!("request failed: {e}"))
                }
            })?;

        let response = check_status(response).await?;

        let parsed = response.json::<GenerateContentResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize Gemini response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        Ok(into_llm_response(parsed))
    }

    fn request_body(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt.to_string()) }],
            }],
            system_instruction: self.system_instruction.as_ref().map(|s| Content {
                role: None,
                parts: vec![Part { text: Some(s.clone()) }],
            }),
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

// Google API error envelope.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

// ── Response handling ─────────────────────────────────────────────────────────

/// Concatenate the text parts of the first candidate. A blocked prompt or a
/// candidate without parts yields empty text.
fn into_llm_response(parsed: GenerateContentResponse) -> LlmResponse {
    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        warn!(%reason, "Gemini blocked the prompt");
    }

    let usage = parsed.usage_metadata.map(|u| LlmUsage {
        input_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count,
    });

    let candidate = parsed.candidates.into_iter().next();
    if let Some(reason) = candidate.as_ref().and_then(|c| c.finish_reason.as_deref()) {
        debug!(finish_reason = %reason, "Gemini candidate finished");
    }

    let text = candidate
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    LlmResponse { text: text.trim().to_string(), usage }
}

/// Consume the response and return it if successful, or a classified error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let err = classify_error(status, &body);
    error!(%status, error = %err, "Gemini request returned HTTP error");
    Err(err)
}

/// Map an HTTP error status and body onto a [`ProviderError`] kind.
///
/// Gemini reports a bad key as `400 INVALID_ARGUMENT` with reason
/// `API_KEY_INVALID`, so the body is inspected as well as the status.
fn classify_error(status: StatusCode, body: &str) -> ProviderError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();

    let message = match &envelope {
        Some(env) => {
            let code = env
                .error
                .status
                .as_deref()
                .map(|s| format!(" [{s}]"))
                .unwrap_or_default();
            format!("HTTP {status}{code}: {}", env.error.message)
        }
        None => format!("HTTP {status}: {}", body.trim()),
    };

    let key_rejected = envelope.as_ref().is_some_and(|env| {
        env.error
            .details
            .iter()
            .any(|d| d.reason.as_deref() == Some("API_KEY_INVALID"))
            || env.error.message.to_lowercase().contains("api key not valid")
    });

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || (status == StatusCode::BAD_REQUEST && key_rejected)
    {
        ProviderError::Authentication(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited(message)
    } else {
        ProviderError::Request(message)
    }
}
