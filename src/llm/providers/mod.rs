//! LLM provider implementations.
//!
//! `build(config, api_key)` is the factory — called once at startup.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod gemini;

use crate::config::LlmConfig;
use crate::llm::{ApiKey, LlmProvider, ProviderError};

/// Construct an `LlmProvider` from config and the raw API key.
///
/// `api_key` is whatever the configured env var held (`None` when unset).
/// Providers that need a key reject an absent or blank one here, before the
/// chat loop starts.
pub fn build(config: &LlmConfig, api_key: Option<String>) -> Result<LlmProvider, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        "gemini" => {
            let key = ApiKey::new(api_key, &config.api_key_env)?;
            let p = gemini::GeminiProvider::new(&config.gemini, key)?;
            Ok(LlmProvider::Gemini(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}
