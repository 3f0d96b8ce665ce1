//! Data model for one research run.
//!
//! [`TopicBlock`] is the unit of work, [`TaskState`] its live view for
//! observers, and [`ResearchState`] the aggregate root owned by the
//! pipeline for the lifetime of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============= Blocks =============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    Researching,
    Completed,
    Failed,
}

impl BlockStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BlockStatus::Completed | BlockStatus::Failed)
    }

    /// Transitions are monotonic; terminal states are absorbing.
    pub fn can_transition_to(self, next: BlockStatus) -> bool {
        use BlockStatus::*;
        matches!(
            (self, next),
            (Pending, Researching) | (Pending, Failed) | (Researching, Completed) | (Researching, Failed)
        )
    }
}

/// One unit of research work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicBlock {
    pub id: String,
    pub sub_topic: String,
    pub overview: String,
    pub status: BlockStatus,
    pub tool_traces: Vec<ToolTrace>,
    pub iteration_count: u32,
    /// Overrides the run-wide iteration budget for this block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TopicBlock {
    pub fn new(id: impl Into<String>, sub_topic: impl Into<String>, overview: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            sub_topic: sub_topic.into(),
            overview: overview.into(),
            status: BlockStatus::Pending,
            tool_traces: Vec::new(),
            iteration_count: 0,
            max_iterations: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Move to `next`, refusing non-monotonic transitions.
    pub fn transition(&mut self, next: BlockStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.transition(BlockStatus::Failed) {
            self.metadata
                .insert("failure_reason".to_string(), serde_json::Value::String(reason.into()));
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.metadata.get("failure_reason").and_then(|v| v.as_str())
    }

    /// Accumulated notes, one line per integrated tool result.
    pub fn notes(&self) -> Vec<&str> {
        self.tool_traces.iter().map(|t| t.note.as_str()).collect()
    }
}

/// Record of one tool invocation within a block. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolTrace {
    pub tool_id: String,
    pub citation_id: u64,
    pub tool_type: String,
    pub query: String,
    pub raw_answer: String,
    /// Size in chars of the raw answer before truncation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
    pub summary: String,
    /// Note integrated from this result, carrying its `[cit:N]` marker.
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

impl ToolTrace {
    pub fn is_truncated(&self) -> bool {
        self.original_size.is_some()
    }
}

// ============= Thoughts & Tasks =============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtKind {
    Sufficiency,
    Plan,
    ToolCall,
    Note,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtEntry {
    #[serde(rename = "type")]
    pub kind: ThoughtKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ThoughtEntry {
    pub fn new(kind: ThoughtKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl From<BlockStatus> for TaskStatus {
    fn from(status: BlockStatus) -> Self {
        match status {
            BlockStatus::Pending => TaskStatus::Pending,
            BlockStatus::Researching => TaskStatus::Running,
            BlockStatus::Completed => TaskStatus::Completed,
            BlockStatus::Failed => TaskStatus::Failed,
        }
    }
}

/// Live view of one block for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub id: String,
    pub topic: String,
    pub status: TaskStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub current_action: String,
    pub tools_used: Vec<String>,
    pub thoughts: Vec<ThoughtEntry>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_query: Option<String>,
}

impl TaskState {
    pub fn for_block(block: &TopicBlock, max_iterations: u32) -> Self {
        Self {
            id: block.id.clone(),
            topic: block.sub_topic.clone(),
            status: block.status.into(),
            iteration: block.iteration_count,
            max_iterations,
            current_action: "Queued".to_string(),
            tools_used: Vec::new(),
            thoughts: Vec::new(),
            updated_at: Utc::now(),
            current_tool: None,
            current_query: None,
        }
    }

    pub fn record(&mut self, thought: ThoughtEntry) {
        self.updated_at = thought.timestamp;
        self.thoughts.push(thought);
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.current_action = action.into();
        self.updated_at = Utc::now();
    }
}

// ============= Outline & Report =============

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutlineSubsection {
    pub title: String,
    #[serde(default)]
    pub instruction: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutlineSection {
    pub title: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default)]
    pub subsections: Vec<OutlineSubsection>,
    /// Generated text, filled in section by section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportOutline {
    pub title: String,
    pub introduction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction_instruction: Option<String>,
    pub conclusion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion_instruction: Option<String>,
    #[serde(default)]
    pub sections: Vec<OutlineSection>,
}

/// One entry of the final reference list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub number: u32,
    pub citation_id: u64,
    pub block_id: String,
    pub tool_type: String,
    pub query: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub text: String,
    pub outline: ReportOutline,
    pub citations: Vec<Citation>,
    /// Every minted citation id mapped to its final 1-based number.
    pub citation_remap: BTreeMap<u64, u32>,
    pub word_count: usize,
    pub section_count: usize,
    pub citation_count: usize,
    /// True when outline generation failed and the single-section fallback was used.
    pub fallback: bool,
}

// ============= Aggregate Root =============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    Planning,
    Researching,
    Reporting,
    Completed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::Planning => "planning",
            Stage::Researching => "researching",
            Stage::Reporting => "reporting",
            Stage::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Series,
    Parallel,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "series" => Ok(ExecutionMode::Series),
            "parallel" => Ok(ExecutionMode::Parallel),
            other => Err(format!("unknown execution mode '{}' (expected series|parallel)", other)),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Series => f.write_str("series"),
            ExecutionMode::Parallel => f.write_str("parallel"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanningState {
    pub original_topic: String,
    pub optimized_topic: String,
    pub sub_topics: Vec<String>,
    pub progress: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchingState {
    pub tasks: BTreeMap<String, TaskState>,
    pub active_task_ids: BTreeSet<String>,
    pub mode: ExecutionMode,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportingState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline: Option<ReportOutline>,
    pub progress: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    pub word_count: usize,
    pub section_count: usize,
    pub citation_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Aggregate root for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchState {
    pub research_id: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub total_blocks: usize,
    pub completed_blocks: usize,
    pub failed_blocks: usize,
    pub planning: PlanningState,
    pub researching: ResearchingState,
    pub reporting: ReportingState,
    pub logs: Vec<LogEntry>,
    /// Highest event sequence folded in by [`ResearchState::apply`].
    #[serde(default)]
    pub last_seq: u64,
}

impl ResearchState {
    pub fn new(research_id: impl Into<String>) -> Self {
        Self {
            research_id: research_id.into(),
            ..Default::default()
        }
    }

    pub fn log(&mut self, level: &str, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level: level.to_string(),
            message: message.into(),
        });
    }

    /// Recompute block counters from the task map.
    pub fn refresh_counts(&mut self) {
        let tasks = self.researching.tasks.values();
        self.total_blocks = self.researching.tasks.len();
        let (mut completed, mut failed) = (0, 0);
        for task in tasks {
            match task.status {
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
                _ => {}
            }
        }
        self.completed_blocks = completed;
        self.failed_blocks = failed;
    }
}
