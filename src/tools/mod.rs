//! Tool Invocation Interface
//!
//! A research agent hands a query and a tool name to the
//! [`ToolRegistry`](crate::tools::registry::ToolRegistry) and gets back a
//! [`ToolOutput`](crate::tools::registry::ToolOutput) with the raw answer
//! and a short summary, or an error.
//!
//! # Module Structure
//!
//! - [`registry`](crate::tools::registry) - `Tool` trait and registration
//! - [`search`](crate::tools::search) - Web search and page fetch (feature `web-tools`)
//!
//! # Example
//!
//! ```ignore
//! let registry = ToolRegistry::with_default_tools();
//! let output = registry.execute("web_search", "chlorophyll absorption").await?;
//! println!("{}", output.summary);
//! ```

/// Tool registry for managing available tools.
pub mod registry;
/// Web search tool using DuckDuckGo.
#[cfg(feature = "web-tools")]
pub mod search;

pub use registry::{Tool, ToolOutput, ToolRegistry};
