//! Configuration and logging utilities.
//!
//! - [`toml_config`] - `research.toml` loading, defaults and validation
//! - [`logging`] - tracing subscriber setup and the event-stream log bridge

/// Tracing setup and log forwarding into research event streams.
pub mod logging;
/// TOML-based configuration.
pub mod toml_config;
