//! LLM Provider Clients and Abstractions
//!
//! The research stages only see [`LLMClient`]; the concrete provider is
//! picked from `[llm]` in `research.toml` through [`Provider`].
//!
//! # Supported Providers
//!
//! Enable providers via Cargo features:
//! - `ollama` - Local Ollama server (default)
//!
//! Library users can plug in any other backend by implementing
//! [`LLMClient`] themselves.

/// Core LLM client trait, provider selection and JSON helpers.
pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use client::{generate_json, parse_json_response, LLMClient, Provider};
