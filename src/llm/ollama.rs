use crate::llm::client::LLMClient;
use crate::types::{AppError, Result};
use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, request::ChatMessageRequest},
};

const DEFAULT_PORT: u16 = 11434;

pub struct OllamaClient {
    client: Ollama,
    model: String,
}

/// Split `http://host:port` into `("http://host", port)`.
fn split_base_url(base_url: &str) -> (String, u16) {
    let (scheme, rest) = match base_url.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", base_url),
    };
    let rest = rest.trim_end_matches('/');
    match rest.rsplit_once(':') {
        Some((host, port)) => (
            format!("{}://{}", scheme, host),
            port.parse().unwrap_or(DEFAULT_PORT),
        ),
        None if rest.is_empty() => ("http://localhost".to_string(), DEFAULT_PORT),
        None => (format!("{}://{}", scheme, rest), DEFAULT_PORT),
    }
}

impl OllamaClient {
    pub async fn new(base_url: String, model: String) -> Result<Self> {
        let (host, port) = split_base_url(&base_url);
        let client = Ollama::new(host, port);
        Ok(Self { client, model })
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = ChatMessageRequest::new(self.model.clone(), messages);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AppError::LLM(format!("Ollama error: {}", e)))?;

        Ok(response.message.content)
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(vec![
            ChatMessage::system(system.to_string()),
            ChatMessage::user(prompt.to_string()),
        ])
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
