//! LLM Client abstractions and provider management
//!
//! Every model call in the pipeline goes through [`LLMClient`]. Providers:
//! - **Ollama**: local inference (feature `ollama`, default)
//!
//! Structured completions are requested as JSON in the prompt and parsed
//! with [`parse_json_response`], which tolerates code fences and prose
//! around the object.

use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Generic LLM client trait for provider abstraction
///
/// All LLM providers implement this trait, allowing for easy swapping
/// between providers without changing pipeline code.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Generate with system prompt
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Ask for a JSON object and deserialize it.
///
/// A reply that does not contain a parsable object is a
/// [`AppError::ModelInvocation`], which the callers treat as retryable.
pub async fn generate_json<T: DeserializeOwned>(
    llm: &dyn LLMClient,
    system: &str,
    prompt: &str,
) -> Result<T> {
    let text = llm.generate_with_system(system, prompt).await?;
    parse_json_response(&text)
}

/// Extract and deserialize the first JSON object in `text`.
pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => serde_json::from_str(&trimmed[start..=end])
            .map_err(|e| AppError::ModelInvocation(format!("unparsable JSON reply: {}", e))),
        _ => Err(AppError::ModelInvocation(format!(
            "expected a JSON object, got: {}",
            truncate_for_log(trimmed, 120)
        ))),
    }
}

fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Provider enum for runtime selection
#[derive(Debug, Clone)]
pub enum Provider {
    /// Ollama local LLM provider
    ///
    /// # Example
    /// ```rust,ignore
    /// let provider = Provider::Ollama {
    ///     base_url: "http://localhost:11434".to_string(),
    ///     model: "llama3.2".to_string(),
    /// };
    /// ```
    Ollama { base_url: String, model: String },
}

impl Provider {
    /// Build a provider from the `[llm]` config section.
    pub fn from_config(config: &crate::utils::toml_config::LlmConfig) -> Result<Self> {
        match config.provider.to_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama {
                base_url: config.base_url.clone(),
                model: config.model.clone(),
            }),
            other => Err(AppError::Configuration(format!(
                "Unknown LLM provider '{}' (supported: ollama)",
                other
            ))),
        }
    }

    /// Create a client instance for this provider
    ///
    /// # Errors
    ///
    /// Returns an error if the provider's feature is not compiled in or
    /// the client cannot be constructed.
    pub async fn create_client(&self) -> Result<Box<dyn LLMClient>> {
        match self {
            #[cfg(feature = "ollama")]
            Provider::Ollama { base_url, model } => Ok(Box::new(
                super::ollama::OllamaClient::new(base_url.clone(), model.clone()).await?,
            )),
            #[cfg(not(feature = "ollama"))]
            Provider::Ollama { .. } => Err(AppError::Configuration(
                "Ollama support not compiled in (enable the `ollama` feature)".to_string(),
            )),
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama { .. } => "Ollama",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Provider::Ollama { model, .. } => model,
        }
    }
}
