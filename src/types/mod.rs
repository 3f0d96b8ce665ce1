use serde::{Deserialize, Serialize};

use crate::research::types::ExecutionMode;

// ============= API Request/Response Types =============

/// Input accepted to start one research run.
///
/// Every field except `topic` falls back to the `[research]` section of
/// `research.toml` when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Per-block iteration budgets keyed by block id (e.g. `block_2`).
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub iteration_overrides: std::collections::HashMap<String, u32>,
}

impl RunRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunStarted {
    pub research_id: String,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Decomposition produced no usable blocks.
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Report synthesis failed: {0}")]
    Synthesis(String),

    #[error("Research run was cancelled")]
    Cancelled,

    #[error("No research block completed")]
    NoCompletedBlocks,
}

impl AppError {
    /// Errors at the tool/model boundary that warrant the single retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::LLM(_)
                | AppError::Tool(_)
                | AppError::ToolInvocation { .. }
                | AppError::ModelInvocation(_)
                | AppError::Timeout { .. }
        )
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Cancelled => StatusCode::CONFLICT,
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::LLM(_) | AppError::Tool(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
