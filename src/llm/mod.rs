//! LLM provider abstraction.
//!
//! [`Generate`] is the collaborator contract the chat session depends on:
//! one prompt in, one [`LlmResponse`] or a tagged [`ProviderError`] out.
//! [`LlmProvider`] is an enum over the concrete backends in `providers/`;
//! add a variant + module for each additional backend.

pub mod providers;

use std::fmt;
use std::future::Future;

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

/// Failure kinds a provider reports. The session switches on the variant:
/// `Authentication` is fatal, everything else is shown and the loop goes on.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("missing API key: set the {0} environment variable")]
    MissingCredential(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Request(String),
}

// ── Credential ────────────────────────────────────────────────────────────────

/// API key held for the lifetime of the process. `Debug` is redacted so the
/// key cannot leak through logs.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Accept `raw` if it is present and non-blank. `env_var` only names the
    /// source in the error message.
    pub fn new(raw: Option<String>, env_var: &str) -> Result<Self, ProviderError> {
        match raw.map(|k| k.trim().to_string()) {
            Some(key) if !key.is_empty() => Ok(Self(key)),
            _ => Err(ProviderError::MissingCredential(env_var.to_string())),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// Token counts reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One completed round-trip. `text` is empty when the provider answered
/// without any text content.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), usage: None }
    }
}

// ── Collaborator contract ─────────────────────────────────────────────────────

pub trait Generate {
    /// Send `prompt` and return the provider's reply.
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<LlmResponse, ProviderError>>;
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Gemini(providers::gemini::GeminiProvider),
    Dummy(providers::dummy::DummyProvider),
}

impl LlmProvider {
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Gemini(_) => "gemini",
            LlmProvider::Dummy(_) => "dummy",
        }
    }
}

impl Generate for LlmProvider {
    async fn generate(&self, prompt: &str) -> Result<LlmResponse, ProviderError> {
        match self {
            LlmProvider::Gemini(p) => p.generate(prompt).await,
            LlmProvider::Dummy(p) => p.generate(prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_rejects_absent_and_blank() {
        for raw in [None, Some(String::new()), Some("   ".to_string())] {
            let err = ApiKey::new(raw, "GEMINI_API_KEY").unwrap_err();
            assert!(matches!(err, ProviderError::MissingCredential(ref v) if v == "GEMINI_API_KEY"));
            assert!(err.to_string().contains("GEMINI_API_KEY"));
        }
    }

    #[test]
    fn api_key_is_trimmed() {
        let key = ApiKey::new(Some("  abc123\n".into()), "K").unwrap();
        assert_eq!(key.expose(), "abc123");
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new(Some("super-secret".into()), "K").unwrap();
        let dbg = format!("{key:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn request_error_message_is_verbatim() {
        let e = ProviderError::Request("HTTP 500 Internal Server Error: backend down".into());
        assert_eq!(e.to_string(), "HTTP 500 Internal Server Error: backend down");
    }

    #[tokio::test]
    async fn enum_dispatches_to_dummy() {
        let p = LlmProvider::Dummy(providers::dummy::DummyProvider);
        assert_eq!(p.name(), "dummy");
        assert_eq!(p.generate("hi").await.unwrap().text, "[echo] hi");
    }
}
