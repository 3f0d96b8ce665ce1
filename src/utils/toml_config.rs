//! TOML-based configuration for A.R.E.S Research
//!
//! Everything lives in one file (`research.toml` by default). Every section
//! and every key is optional; missing values fall back to the defaults
//! below. The file is validated right after parsing.

use crate::research::types::ExecutionMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure loaded from research.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AresConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub research: ResearchConfig,

    #[serde(default)]
    pub reporting: ReportingConfig,
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Finished runs kept in memory for status and report queries
    #[serde(default = "default_retained_runs")]
    pub retained_runs: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_retained_runs() -> usize {
    16
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            retained_runs: default_retained_runs(),
        }
    }
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of the human-readable format
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============= LLM Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
        }
    }
}

// ============= Research Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Iteration budget per block unless overridden per run or per block
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Concurrency bound in parallel mode
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Attempts per tool/model call; 2 means one retry
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Raw tool answers longer than this are truncated
    #[serde(default = "default_max_raw_answer_chars")]
    pub max_raw_answer_chars: usize,

    /// Cap on sub-topics discovered mid-research per run
    #[serde(default = "default_max_discovered_blocks")]
    pub max_discovered_blocks: usize,

    /// Interval of `parallel_status_update` events
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    /// Tool used when the model names one that is not registered
    #[serde(default = "default_tool")]
    pub default_tool: String,

    /// Suggested number of sub-topics for decomposition
    #[serde(default = "default_subtopic_hint")]
    pub subtopic_hint: usize,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_max_concurrency() -> usize {
    3
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    2
}

fn default_max_raw_answer_chars() -> usize {
    8000
}

fn default_max_discovered_blocks() -> usize {
    5
}

fn default_status_interval_ms() -> u64 {
    1000
}

fn default_tool() -> String {
    "web_search".to_string()
}

fn default_subtopic_hint() -> usize {
    5
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            mode: ExecutionMode::default(),
            max_concurrency: default_max_concurrency(),
            llm_timeout_secs: default_llm_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_attempts: default_max_attempts(),
            max_raw_answer_chars: default_max_raw_answer_chars(),
            max_discovered_blocks: default_max_discovered_blocks(),
            status_interval_ms: default_status_interval_ms(),
            default_tool: default_tool(),
            subtopic_hint: default_subtopic_hint(),
        }
    }
}

impl ResearchConfig {
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

// ============= Reporting Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Jaccard similarity at or above which two tool results share a citation
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,

    /// Sections shorter than this are rewritten once
    #[serde(default)]
    pub min_section_words: usize,
}

fn default_dedup_threshold() -> f64 {
    0.8
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: default_dedup_threshold(),
            min_section_words: 0,
        }
    }
}

// ============= Loading & Validation =============

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Configuration(err.to_string())
    }
}

impl AresConfig {
    /// Load and validate configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Like [`AresConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::FileNotFound(path)) => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AresConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let research = &self.research;

        if research.max_iterations < 1 {
            return Err(ConfigError::ValidationError(
                "research.max_iterations must be at least 1".to_string(),
            ));
        }
        if research.max_concurrency < 1 {
            return Err(ConfigError::ValidationError(
                "research.max_concurrency must be at least 1".to_string(),
            ));
        }
        if !(1..=2).contains(&research.max_attempts) {
            return Err(ConfigError::ValidationError(format!(
                "research.max_attempts must be 1 or 2, got {}",
                research.max_attempts
            )));
        }
        if research.llm_timeout_secs == 0 || research.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "research timeouts must be greater than zero".to_string(),
            ));
        }
        if research.status_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "research.status_interval_ms must be greater than zero".to_string(),
            ));
        }
        if research.default_tool.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "research.default_tool must not be empty".to_string(),
            ));
        }

        let threshold = self.reporting.dedup_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "reporting.dedup_threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("llm.model must not be empty".to_string()));
        }

        Ok(())
    }
}
