//! Dummy LLM provider — echoes input back prefixed with `[echo]`.
//! Lets the console loop run end to end without an API key.

use crate::llm::{LlmResponse, ProviderError};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn generate(&self, prompt: &str) -> Result<LlmResponse, ProviderError> {
        Ok(LlmResponse::text(format!("[echo] {prompt}")))
    }
}
