//! Mock implementations for testing.
//!
//! [`ScriptedLLM`] answers every pipeline prompt by looking at the system
//! prompt it was sent, so one instance can drive a whole run. [`MockTool`]
//! stands in for web search with configurable delay, failures and hangs,
//! and tracks how many invocations were in flight at once.

#![allow(dead_code)]

use ares_research::llm::LLMClient;
use ares_research::research::prompts;
use ares_research::tools::{Tool, ToolOutput, ToolRegistry};
use ares_research::types::{AppError, Result};
use ares_research::utils::toml_config::AresConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Config tuned for tests: short timeouts and a fast status ticker.
pub fn test_config() -> AresConfig {
    let mut config = AresConfig::default();
    config.research.llm_timeout_secs = 5;
    config.research.tool_timeout_secs = 1;
    config.research.max_attempts = 2;
    config.research.status_interval_ms = 50;
    config.research.default_tool = "web_search".to_string();
    config
}

fn line_value<'a>(prompt: &'a str, prefix: &str) -> Option<&'a str> {
    prompt.lines().find_map(|l| l.strip_prefix(prefix)).map(str::trim)
}

/// Mock LLM client that answers by prompt kind.
///
/// # Examples
///
/// ```ignore
/// let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions", "Calvin cycle"])
///     .sufficient_after("Light reactions", 1);
/// ```
pub struct ScriptedLLM {
    optimized_topic: Option<String>,
    sub_topics: Vec<String>,
    sufficient_after: HashMap<String, u32>,
    discoveries: Mutex<HashMap<String, String>>,
    failing: HashSet<&'static str>,
    outline: Option<String>,
    section: Option<String>,
    delay: Duration,
    sufficiency_calls: Mutex<HashMap<String, u32>>,
    query_calls: Mutex<HashMap<String, u32>>,
    calls: AtomicUsize,
}

impl ScriptedLLM {
    /// Rephrases `topic` to "<topic>: mechanisms and significance" and
    /// decomposes it into `sub_topics`. Blocks are never sufficient unless
    /// configured with [`ScriptedLLM::sufficient_after`].
    pub fn new(topic: &str, sub_topics: &[&str]) -> Self {
        Self {
            optimized_topic: Some(format!("{}: mechanisms and significance", topic)),
            sub_topics: sub_topics.iter().map(|s| s.to_string()).collect(),
            sufficient_after: HashMap::new(),
            discoveries: Mutex::new(HashMap::new()),
            failing: HashSet::new(),
            outline: None,
            section: None,
            delay: Duration::ZERO,
            sufficiency_calls: Mutex::new(HashMap::new()),
            query_calls: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Report `sub_topic` as sufficient once `n` insufficient verdicts were given.
    pub fn sufficient_after(mut self, sub_topic: &str, n: u32) -> Self {
        self.sufficient_after.insert(sub_topic.to_string(), n);
        self
    }

    /// The first note written for `sub_topic` proposes `new_sub_topic`.
    pub fn discovers(self, sub_topic: &str, new_sub_topic: &str) -> Self {
        self.discoveries
            .lock()
            .insert(sub_topic.to_string(), new_sub_topic.to_string());
        self
    }

    /// Every call with this system prompt fails with a retryable error.
    pub fn failing_on(mut self, system: &'static str) -> Self {
        self.failing.insert(system);
        self
    }

    /// Reply to outline requests with this raw text.
    pub fn with_outline(mut self, raw: &str) -> Self {
        self.outline = Some(raw.to_string());
        self
    }

    /// Reply to section requests with this raw text.
    pub fn with_section(mut self, raw: &str) -> Self {
        self.section = Some(raw.to_string());
        self
    }

    /// Sleep this long before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, system: &str, prompt: &str) -> Result<String> {
        if self.failing.contains(system) {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }

        let reply = if system == prompts::REPHRASE_SYSTEM {
            let topic = line_value(prompt, "Research topic:").unwrap_or_default();
            json!({ "topic": self.optimized_topic.clone().unwrap_or_else(|| topic.to_string()) })
                .to_string()
        } else if system == prompts::DECOMPOSE_SYSTEM {
            let sub_topics: Vec<_> = self
                .sub_topics
                .iter()
                .map(|s| json!({ "sub_topic": s, "overview": format!("What is known about {}", s) }))
                .collect();
            json!({ "sub_topics": sub_topics }).to_string()
        } else if system == prompts::SUFFICIENCY_SYSTEM {
            let sub_topic = line_value(prompt, "Sub-topic:").unwrap_or_default().to_string();
            let mut calls = self.sufficiency_calls.lock();
            let count = calls.entry(sub_topic.clone()).or_insert(0);
            *count += 1;
            let sufficient = self
                .sufficient_after
                .get(&sub_topic)
                .is_some_and(|n| *count > *n);
            json!({ "sufficient": sufficient, "reason": format!("{} notes reviewed", *count - 1) })
                .to_string()
        } else if system == prompts::QUERY_SYSTEM {
            let sub_topic = line_value(prompt, "Sub-topic:").unwrap_or_default().to_string();
            let mut calls = self.query_calls.lock();
            let count = calls.entry(sub_topic.clone()).or_insert(0);
            *count += 1;
            json!({
                "query": format!("{} query {}", sub_topic, count),
                "tool": "web_search",
                "rationale": "fill the next gap"
            })
            .to_string()
        } else if system == prompts::NOTE_SYSTEM {
            let sub_topic = line_value(prompt, "Sub-topic:").unwrap_or_default();
            let query = line_value(prompt, "Query:").unwrap_or_default();
            let new_topic = self
                .discoveries
                .lock()
                .remove(sub_topic)
                .map(|s| json!({ "sub_topic": s, "overview": format!("Discovered while researching {}", sub_topic) }));
            json!({ "note": format!("Finding about {}", query), "new_topic": new_topic }).to_string()
        } else if system == prompts::OUTLINE_SYSTEM {
            match &self.outline {
                Some(raw) => raw.clone(),
                None => {
                    let sections: Vec<_> = prompt
                        .lines()
                        .filter_map(|l| l.strip_prefix('['))
                        .filter_map(|l| l.split_once("] "))
                        .map(|(id, title)| {
                            json!({
                                "title": title,
                                "instruction": format!("Explain {}", title),
                                "block_id": id,
                                "subsections": []
                            })
                        })
                        .collect();
                    json!({
                        "title": "Research Report",
                        "introduction": "Introduce the topic",
                        "conclusion": "Summarize the findings",
                        "sections": sections
                    })
                    .to_string()
                }
            }
        } else if system == prompts::SECTION_SYSTEM && self.section.is_some() {
            self.section.clone().unwrap_or_default()
        } else if system == prompts::SECTION_SYSTEM {
            let notes: Vec<&str> = prompt
                .split_once("Notes:\n")
                .map(|(_, notes)| notes.lines().filter_map(|l| l.strip_prefix("- ")).collect())
                .unwrap_or_default();
            format!("This section draws on the notes. {}", notes.join(" "))
        } else if system == prompts::FRAME_SYSTEM {
            "A framing paragraph for the report.".to_string()
        } else {
            "Mock response".to_string()
        };
        Ok(reply)
    }
}

#[async_trait]
impl LLMClient for ScriptedLLM {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer(system, prompt)
    }

    fn model_name(&self) -> &str {
        "scripted-mock"
    }
}

const FACTS: &[&str] = &[
    "chlorophyll absorbs mostly red and blue light",
    "water is split at photosystem II releasing oxygen",
    "ATP synthase is driven by a proton gradient across the thylakoid",
    "RuBisCO fixes carbon dioxide onto ribulose bisphosphate",
    "stomata regulate gas exchange and water loss",
    "NADPH carries reducing power into the stroma",
    "C4 plants concentrate CO2 in bundle sheath cells",
    "light intensity limits the rate at low irradiance",
];

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock research tool.
pub struct MockTool {
    name: String,
    delay: Duration,
    fail_on: Option<String>,
    hang_on: Option<String>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockTool {
    /// A `web_search` tool that answers instantly with a distinct fact.
    pub fn new() -> Self {
        Self::named("web_search")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            fail_on: None,
            hang_on: None,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queries containing `pattern` fail with a retryable tool error.
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    /// Queries containing `pattern` never return.
    pub fn hanging_on(mut self, pattern: &str) -> Self {
        self.hang_on = Some(pattern.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of invocations observed in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn registry(self: &Arc<Self>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::clone(self) as Arc<dyn Tool>);
        Arc::new(registry)
    }
}

impl Default for MockTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock web search"
    }

    async fn invoke(&self, query: &str) -> Result<ToolOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if self.hang_on.as_deref().is_some_and(|p| query.contains(p)) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on.as_deref().is_some_and(|p| query.contains(p)) {
            return Err(AppError::Tool(format!("search backend rejected '{}'", query)));
        }

        let fact = FACTS[call % FACTS.len()];
        Ok(ToolOutput::new(
            format!("Full page text for '{}': {} (result {}).", query, fact, call + 1),
            format!("{} (result {})", fact, call + 1),
        ))
    }
}
