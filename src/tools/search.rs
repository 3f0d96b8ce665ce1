//! Search tool implementation using daedra
//!
//! Web search and page fetching via the daedra crate, which uses
//! DuckDuckGo as the search backend. Both tools return the full result as
//! JSON in `raw` and a compact line-per-hit `summary`.

use crate::tools::registry::{Tool, ToolOutput};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

const DEFAULT_NUM_RESULTS: usize = 5;

/// Web search tool powered by daedra
pub struct SearchTool {
    num_results: usize,
}

impl SearchTool {
    pub fn new() -> Self {
        Self {
            num_results: DEFAULT_NUM_RESULTS,
        }
    }

    pub fn with_num_results(num_results: usize) -> Self {
        Self {
            num_results: num_results.max(1),
        }
    }
}

impl Default for SearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information using DuckDuckGo"
    }

    async fn invoke(&self, query: &str) -> Result<ToolOutput> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("Empty search query".to_string()));
        }

        let search_args = daedra::SearchArgs {
            query: query.to_string(),
            options: Some(daedra::SearchOptions {
                num_results: self.num_results,
                ..Default::default()
            }),
        };

        let response = daedra::tools::search::perform_search(&search_args)
            .await
            .map_err(|e| AppError::ToolInvocation {
                tool: "web_search".to_string(),
                message: format!("Search failed: {}", e),
            })?;

        let results: Vec<Value> = response
            .data
            .iter()
            .map(|r| {
                json!({
                    "title": r.title,
                    "url": r.url,
                    "description": r.description
                })
            })
            .collect();

        let summary = if response.data.is_empty() {
            format!("No results for '{}'", query)
        } else {
            response
                .data
                .iter()
                .map(|r| format!("{}: {}", r.title, r.description))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let raw = json!({
            "query": query,
            "results": results,
            "count": results.len()
        });

        Ok(ToolOutput::new(raw.to_string(), summary))
    }
}

/// Page fetching tool powered by daedra. The query is the page URL.
pub struct FetchPageTool;

impl FetchPageTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FetchPageTool {
    fn default() -> Self {
        Self::new()
    }
}

fn first_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Tool for FetchPageTool {
    fn name(&self) -> &str {
        "fetch_page"
    }

    fn description(&self) -> &str {
        "Fetch a web page by URL and convert it to markdown"
    }

    async fn invoke(&self, query: &str) -> Result<ToolOutput> {
        let url = query.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::InvalidInput(format!("Not a URL: '{}'", url)));
        }

        let fetch_args = daedra::VisitPageArgs {
            url: url.to_string(),
            include_images: false,
            selector: None,
        };

        let page = daedra::tools::fetch::fetch_page(&fetch_args)
            .await
            .map_err(|e| AppError::ToolInvocation {
                tool: "fetch_page".to_string(),
                message: format!("Failed to fetch page: {}", e),
            })?;

        let summary = format!("{}: {}", page.title, first_words(&page.content, 40));
        let raw = json!({
            "url": page.url,
            "title": page.title,
            "content": page.content,
            "word_count": page.word_count
        });

        Ok(ToolOutput::new(raw.to_string(), summary))
    }
}
