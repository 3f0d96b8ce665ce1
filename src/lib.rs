//! # A.R.E.S Deep Research
//!
//! A multi-stage research pipeline built in Rust. A topic is planned into
//! sub-topic blocks, each block is researched by a bounded tool-calling
//! agent loop, and the gathered knowledge is synthesized into a Markdown
//! report with numbered citations.
//!
//! ## Overview
//!
//! A.R.E.S Research can be used in two ways:
//!
//! 1. **As a CLI / server** - Run the `ares-research` binary (`run`, `serve`)
//! 2. **As a library** - Embed [`ResearchPipeline`] with your own
//!    [`LLMClient`] and [`Tool`]s
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use ares_research::{AresConfig, Provider, ResearchPipeline, ToolRegistry};
//! use ares_research::types::RunRequest;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AresConfig::default();
//!     let llm = Provider::from_config(&config.llm)?.create_client().await?;
//!     let tools = Arc::new(ToolRegistry::with_default_tools());
//!
//!     let pipeline = ResearchPipeline::new(Arc::from(llm), tools, config);
//!     let report = pipeline.run(RunRequest::new("Photosynthesis")).await?;
//!     println!("{}", report.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama local inference (default) |
//! | `web-tools` | Web search and page fetch tools (default) |
//!
//! ## Modules
//!
//! - [`research`] - Planner, agents, scheduler, synthesizer and event stream
//! - [`llm`] - LLM client trait and providers
//! - [`tools`] - Tool trait and registry
//! - [`api`] - REST + SSE handlers and routes
//! - [`cli`] - Command-line interface
//! - [`types`] - Request types and error handling
//! - [`utils`] - Configuration and logging

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// HTTP API handlers and routes.
pub mod api;
/// Command-line interface.
pub mod cli;
/// LLM provider clients and abstractions.
pub mod llm;
/// Deep research pipeline.
pub mod research;
/// Research tools (web search, page fetch).
pub mod tools;
/// Core types (requests, errors).
pub mod types;
/// Configuration and logging.
pub mod utils;

// Re-export commonly used types
pub use api::RunRegistry;
pub use llm::{LLMClient, Provider};
pub use research::{ResearchPipeline, ResearchRun};
pub use tools::{Tool, ToolRegistry};
pub use types::{AppError, Result};
pub use utils::toml_config::AresConfig;

use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Pipeline used to start new runs
    pub pipeline: ResearchPipeline,
    /// Runs started by this process
    pub runs: Arc<RunRegistry>,
}

impl AppState {
    pub fn new(pipeline: ResearchPipeline) -> Self {
        let retention = pipeline.config().server.retained_runs;
        Self {
            pipeline,
            runs: Arc::new(RunRegistry::new(retention)),
        }
    }
}
