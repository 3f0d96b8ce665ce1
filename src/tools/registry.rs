use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a tool returns for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    /// Full answer, truncated later by the agent if too large.
    pub raw: String,
    /// Short human-readable summary used for notes and deduplication.
    pub summary: String,
}

impl ToolOutput {
    pub fn new(raw: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            summary: summary.into(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn invoke(&self, query: &str) -> Result<ToolOutput>;
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Create a new registry with default tools (web search, page fetch)
    #[cfg(feature = "web-tools")]
    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::tools::search::SearchTool::new()));
        registry.register(Arc::new(crate::tools::search::FetchPageTool::new()));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub async fn execute(&self, name: &str, query: &str) -> Result<ToolOutput> {
        match self.tools.get(name) {
            Some(tool) => tool.invoke(query).await,
            None => Err(AppError::NotFound(format!("Tool not found: {}", name))),
        }
    }

    /// Get a list of all registered tool names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Check if a tool is registered
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One `- name: description` line per tool, for prompts.
    pub fn describe(&self) -> String {
        self.tools
            .values()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "rag_naive"
        }

        fn description(&self) -> &str {
            "Echo the query back"
        }

        async fn invoke(&self, query: &str) -> Result<ToolOutput> {
            Ok(ToolOutput::new(query, format!("echo: {}", query)))
        }
    }

    #[test]
    fn test_registry_creation() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.tool_names().len(), 0);
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));

        assert!(registry.has_tool("rag_naive"));
        let output = registry.execute("rag_naive", "chlorophyll").await.unwrap();
        assert_eq!(output.summary, "echo: chlorophyll");
        assert_eq!(registry.describe(), "- rag_naive: Echo the query back");
    }

    #[tokio::test]
    async fn test_nonexistent_tool() {
        let registry = ToolRegistry::new();
        let result = registry.execute("code_execution", "1+1").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[cfg(feature = "web-tools")]
    #[test]
    fn test_registry_with_default_tools() {
        let registry = ToolRegistry::with_default_tools();
        assert!(registry.has_tool("web_search"));
        assert!(registry.has_tool("fetch_page"));
    }
}
