//! Ordered event stream for one research run.
//!
//! Every stage announces its transitions through [`EventStream::publish`].
//! Events get a run-scoped sequence number and are kept in an append-only
//! history, so a subscriber always receives the full replay before live
//! events and can resynchronise after lagging behind. Delivery is
//! at-least-once; subscribers dedupe by `seq` (see [`ResearchState::apply`]).
//!
//! For a single block id events are published in the order the agent
//! generates them. Across blocks in parallel mode no relative order is
//! guaranteed beyond the `seq` assigned at publish time.

use super::types::{ExecutionMode, ResearchState, Stage, TaskState, TaskStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Default capacity of the live broadcast buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Snapshot of one in-flight block carried by `parallel_status_update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveTask {
    pub block_id: String,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Closed set of event payloads, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // ---- planning ----
    PlanningStarted {
        topic: String,
    },
    RephraseCompleted {
        original_topic: String,
        optimized_topic: String,
    },
    DecomposeStarted {
        topic: String,
    },
    DecomposeCompleted {
        sub_topics: Vec<String>,
    },
    QueueSeeded {
        block_ids: Vec<String>,
    },
    PlanningCompleted {
        optimized_topic: String,
        block_count: usize,
    },

    // ---- researching ----
    ResearchingStarted {
        mode: ExecutionMode,
        max_concurrency: usize,
        total_blocks: usize,
    },
    BlockStarted {
        block_id: String,
        sub_topic: String,
        max_iterations: u32,
    },
    CheckingSufficiency {
        block_id: String,
        iteration: u32,
    },
    KnowledgeSufficient {
        block_id: String,
        iteration: u32,
        reason: String,
    },
    GeneratingQuery {
        block_id: String,
        iteration: u32,
    },
    ToolCalling {
        block_id: String,
        iteration: u32,
        tool: String,
        query: String,
        attempt: u32,
    },
    ToolCompleted {
        block_id: String,
        iteration: u32,
        tool: String,
        summary: String,
    },
    ProcessingNotes {
        block_id: String,
        iteration: u32,
    },
    NewTopicAdded {
        block_id: String,
        new_block_id: String,
        sub_topic: String,
    },
    IterationCompleted {
        block_id: String,
        iteration: u32,
        /// Citation id of the tool result integrated in this iteration.
        citation_id: u64,
    },
    BlockCompleted {
        block_id: String,
        iterations: u32,
        citations: usize,
        partial: bool,
    },
    BlockFailed {
        block_id: String,
        reason: String,
    },
    ParallelStatusUpdate {
        active: Vec<ActiveTask>,
        queued: usize,
        completed: usize,
        failed: usize,
    },
    ResearchingCompleted {
        total: usize,
        completed: usize,
        failed: usize,
    },

    // ---- reporting ----
    ReportingStarted {
        block_count: usize,
    },
    DeduplicateCompleted {
        raw_citations: usize,
        unique_citations: usize,
    },
    OutlineCompleted {
        title: String,
        section_count: usize,
        fallback: bool,
    },
    WritingSection {
        index: usize,
        total: usize,
        title: String,
    },
    WritingCompleted {
        section_count: usize,
    },
    ReportingCompleted {
        word_count: usize,
        section_count: usize,
        citation_count: usize,
    },

    // ---- system (never required for state reconstruction) ----
    Log {
        level: String,
        module: String,
        message: String,
    },
    Error {
        message: String,
        fatal: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
    },
    Status {
        message: String,
    },
}

impl EventPayload {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        use EventPayload::*;
        match self {
            PlanningStarted { .. } => "planning_started",
            RephraseCompleted { .. } => "rephrase_completed",
            DecomposeStarted { .. } => "decompose_started",
            DecomposeCompleted { .. } => "decompose_completed",
            QueueSeeded { .. } => "queue_seeded",
            PlanningCompleted { .. } => "planning_completed",
            ResearchingStarted { .. } => "researching_started",
            BlockStarted { .. } => "block_started",
            CheckingSufficiency { .. } => "checking_sufficiency",
            KnowledgeSufficient { .. } => "knowledge_sufficient",
            GeneratingQuery { .. } => "generating_query",
            ToolCalling { .. } => "tool_calling",
            ToolCompleted { .. } => "tool_completed",
            ProcessingNotes { .. } => "processing_notes",
            NewTopicAdded { .. } => "new_topic_added",
            IterationCompleted { .. } => "iteration_completed",
            BlockCompleted { .. } => "block_completed",
            BlockFailed { .. } => "block_failed",
            ParallelStatusUpdate { .. } => "parallel_status_update",
            ResearchingCompleted { .. } => "researching_completed",
            ReportingStarted { .. } => "reporting_started",
            DeduplicateCompleted { .. } => "deduplicate_completed",
            OutlineCompleted { .. } => "outline_completed",
            WritingSection { .. } => "writing_section",
            WritingCompleted { .. } => "writing_completed",
            ReportingCompleted { .. } => "reporting_completed",
            Log { .. } => "log",
            Error { .. } => "error",
            Status { .. } => "status",
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        use EventPayload::*;
        match self {
            PlanningStarted { .. }
            | RephraseCompleted { .. }
            | DecomposeStarted { .. }
            | DecomposeCompleted { .. }
            | QueueSeeded { .. }
            | PlanningCompleted { .. } => Some(Stage::Planning),
            ReportingStarted { .. }
            | DeduplicateCompleted { .. }
            | OutlineCompleted { .. }
            | WritingSection { .. }
            | WritingCompleted { .. } => Some(Stage::Reporting),
            ReportingCompleted { .. } => Some(Stage::Completed),
            Log { .. } | Error { .. } | Status { .. } => None,
            _ => Some(Stage::Researching),
        }
    }

    pub fn status(&self) -> Option<&'static str> {
        use EventPayload::*;
        match self {
            PlanningStarted { .. } | ResearchingStarted { .. } | ReportingStarted { .. } | BlockStarted { .. } => {
                Some("running")
            }
            PlanningCompleted { .. }
            | ResearchingCompleted { .. }
            | ReportingCompleted { .. }
            | BlockCompleted { .. } => Some("completed"),
            BlockFailed { .. } => Some("failed"),
            Error { fatal: true, .. } => Some("failed"),
            _ => None,
        }
    }

    /// Id of the block this event belongs to, if any.
    pub fn block_id(&self) -> Option<&str> {
        use EventPayload::*;
        match self {
            BlockStarted { block_id, .. }
            | CheckingSufficiency { block_id, .. }
            | KnowledgeSufficient { block_id, .. }
            | GeneratingQuery { block_id, .. }
            | ToolCalling { block_id, .. }
            | ToolCompleted { block_id, .. }
            | ProcessingNotes { block_id, .. }
            | NewTopicAdded { block_id, .. }
            | IterationCompleted { block_id, .. }
            | BlockCompleted { block_id, .. }
            | BlockFailed { block_id, .. } => Some(block_id),
            Error { block_id, .. } => block_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(
            self,
            EventPayload::Log { .. } | EventPayload::Error { .. } | EventPayload::Status { .. }
        )
    }
}

/// One published event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchEvent {
    pub seq: u64,
    pub research_id: String,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the first event of the current stage.
    pub stage_elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
    /// Open-ended fields that are not part of the typed payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResearchEvent {
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    pub fn block_id(&self) -> Option<&str> {
        self.payload.block_id()
    }
}

struct StreamInner {
    history: Vec<ResearchEvent>,
    sender: Option<broadcast::Sender<ResearchEvent>>,
    next_seq: u64,
    stage: Option<Stage>,
    stage_started: Instant,
}

/// Fan-out publisher for one research run.
pub struct EventStream {
    research_id: String,
    inner: Mutex<StreamInner>,
}

impl EventStream {
    pub fn new(research_id: impl Into<String>) -> Arc<Self> {
        Self::with_capacity(research_id, DEFAULT_EVENT_BUFFER)
    }

    pub fn with_capacity(research_id: impl Into<String>, capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            research_id: research_id.into(),
            inner: Mutex::new(StreamInner {
                history: Vec::new(),
                sender: Some(sender),
                next_seq: 1,
                stage: None,
                stage_started: Instant::now(),
            }),
        })
    }

    pub fn research_id(&self) -> &str {
        &self.research_id
    }

    pub fn publish(&self, payload: EventPayload) -> ResearchEvent {
        self.publish_with_extra(payload, serde_json::Map::new())
    }

    /// Publish with additional untyped fields.
    ///
    /// Sequence assignment, history append and broadcast happen under one
    /// lock, so history order, `seq` order and live delivery order agree.
    pub fn publish_with_extra(
        &self,
        payload: EventPayload,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> ResearchEvent {
        let mut inner = self.inner.lock();

        let stage = payload.stage();
        if stage.is_some() && stage != inner.stage {
            inner.stage = stage;
            inner.stage_started = Instant::now();
        }

        let event = ResearchEvent {
            seq: inner.next_seq,
            research_id: self.research_id.clone(),
            timestamp: Utc::now(),
            stage_elapsed_ms: inner.stage_started.elapsed().as_millis() as u64,
            stage,
            status: payload.status().map(str::to_string),
            payload,
            extra,
        };
        inner.next_seq += 1;
        inner.history.push(event.clone());

        if let Some(sender) = &inner.sender {
            // No live subscribers is fine; the history keeps the event.
            let _ = sender.send(event.clone());
        }

        event
    }

    /// Subscribe: replay everything published so far, then follow live.
    pub fn subscribe(self: &Arc<Self>) -> EventSubscription {
        let inner = self.inner.lock();
        EventSubscription {
            stream: Arc::clone(self),
            replay: inner.history.iter().cloned().collect(),
            receiver: inner.sender.as_ref().map(|s| s.subscribe()),
            last_seq: 0,
        }
    }

    /// Stop live delivery. Subscribers drain what they have and end.
    pub fn close(&self) {
        self.inner.lock().sender.take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().sender.is_none()
    }

    pub fn history(&self) -> Vec<ResearchEvent> {
        self.inner.lock().history.clone()
    }

    fn history_after(&self, seq: u64) -> VecDeque<ResearchEvent> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|e| e.seq > seq)
            .cloned()
            .collect()
    }

    /// Events for one block, in publish order.
    pub fn block_events(&self, block_id: &str) -> Vec<ResearchEvent> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|e| e.block_id() == Some(block_id))
            .cloned()
            .collect()
    }
}

/// A subscriber connection.
pub struct EventSubscription {
    stream: Arc<EventStream>,
    replay: VecDeque<ResearchEvent>,
    receiver: Option<broadcast::Receiver<ResearchEvent>>,
    last_seq: u64,
}

impl EventSubscription {
    /// Next event, or `None` once the stream is closed and drained.
    pub async fn recv(&mut self) -> Option<ResearchEvent> {
        loop {
            if let Some(event) = self.replay.pop_front() {
                if event.seq <= self.last_seq {
                    continue;
                }
                self.last_seq = event.seq;
                return Some(event);
            }

            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => {
                    if event.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = event.seq;
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        research_id = %self.stream.research_id,
                        skipped,
                        "Event subscriber lagged, resyncing from history"
                    );
                    self.replay = self.stream.history_after(self.last_seq);
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    self.replay = self.stream.history_after(self.last_seq);
                }
            }
        }
    }

    pub fn into_stream(self) -> impl futures::Stream<Item = ResearchEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

// ============= Per-block ordering =============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockPhase {
    Queued,
    Started,
    Checking,
    Sufficient,
    Generating,
    Calling,
    ToolDone,
    Processing,
    IterationDone,
    Terminal,
}

fn advance(phase: BlockPhase, payload: &EventPayload) -> Option<BlockPhase> {
    use BlockPhase::*;
    use EventPayload as E;

    if phase == Terminal {
        return None;
    }
    if matches!(payload, E::BlockFailed { .. }) {
        return Some(Terminal);
    }

    match (phase, payload) {
        (Queued, E::BlockStarted { .. }) => Some(Started),
        (Started, E::CheckingSufficiency { .. }) => Some(Checking),
        (IterationDone, E::CheckingSufficiency { .. }) => Some(Checking),
        (Checking, E::KnowledgeSufficient { .. }) => Some(Sufficient),
        (Checking, E::GeneratingQuery { .. }) => Some(Generating),
        (Generating, E::ToolCalling { .. }) => Some(Calling),
        (Calling, E::ToolCalling { attempt, .. }) if *attempt > 1 => Some(Calling),
        (Calling, E::ToolCompleted { .. }) => Some(ToolDone),
        (ToolDone, E::ProcessingNotes { .. }) => Some(Processing),
        (Processing, E::NewTopicAdded { .. }) => Some(Processing),
        (Processing, E::IterationCompleted { .. }) => Some(IterationDone),
        (Sufficient, E::BlockCompleted { .. }) => Some(Terminal),
        (IterationDone, E::BlockCompleted { .. }) => Some(Terminal),
        _ => None,
    }
}

/// Check that a block's event sequence is a valid path through the agent
/// state machine: no skipped transitions and nothing after a terminal event.
pub fn validate_block_sequence(events: &[ResearchEvent]) -> Result<(), String> {
    let mut phase = BlockPhase::Queued;
    for event in events {
        phase = advance(phase, &event.payload).ok_or_else(|| {
            format!(
                "invalid transition from {:?} on '{}' (seq {})",
                phase,
                event.kind(),
                event.seq
            )
        })?;
    }
    Ok(())
}

// ============= Client-side reducer =============

impl ResearchState {
    /// Fold one event into the state. Returns `false` when the event was
    /// already applied, which makes duplicate delivery harmless.
    pub fn apply(&mut self, event: &ResearchEvent) -> bool {
        if event.seq <= self.last_seq {
            return false;
        }
        self.last_seq = event.seq;
        if self.research_id.is_empty() {
            self.research_id = event.research_id.clone();
        }
        if let Some(stage) = event.stage {
            self.stage = stage;
        }

        use EventPayload as E;
        match &event.payload {
            E::PlanningStarted { topic } => {
                self.started_at.get_or_insert(event.timestamp);
                self.planning.original_topic = topic.clone();
                self.planning.progress = "Optimizing topic".to_string();
            }
            E::RephraseCompleted { optimized_topic, .. } => {
                self.planning.optimized_topic = optimized_topic.clone();
                self.planning.progress = "Topic optimized".to_string();
            }
            E::DecomposeStarted { .. } => {
                self.planning.progress = "Decomposing topic".to_string();
            }
            E::DecomposeCompleted { sub_topics } => {
                self.planning.sub_topics = sub_topics.clone();
                self.planning.progress = format!("{} sub-topics identified", sub_topics.len());
            }
            E::QueueSeeded { .. } | E::PlanningCompleted { .. } => {
                self.planning.progress = "Planning completed".to_string();
            }
            E::ResearchingStarted {
                mode,
                max_concurrency,
                total_blocks,
            } => {
                self.researching.mode = *mode;
                self.researching.max_concurrency = *max_concurrency;
                self.total_blocks = (*total_blocks).max(self.total_blocks);
            }
            E::BlockStarted {
                block_id,
                sub_topic,
                max_iterations,
            } => {
                let task = self.task_entry(block_id, sub_topic, *max_iterations);
                task.status = TaskStatus::Running;
                task.current_action = "Started".to_string();
                task.updated_at = event.timestamp;
                self.researching.active_task_ids.insert(block_id.clone());
            }
            E::CheckingSufficiency { block_id, iteration } => {
                self.update_task(block_id, event.timestamp, |t| {
                    t.iteration = *iteration;
                    t.current_action = "Checking knowledge sufficiency".to_string();
                });
            }
            E::KnowledgeSufficient { block_id, .. } => {
                self.update_task(block_id, event.timestamp, |t| {
                    t.current_action = "Knowledge sufficient".to_string();
                });
            }
            E::GeneratingQuery { block_id, .. } => {
                self.update_task(block_id, event.timestamp, |t| {
                    t.current_action = "Generating query".to_string();
                });
            }
            E::ToolCalling {
                block_id, tool, query, ..
            } => {
                self.update_task(block_id, event.timestamp, |t| {
                    t.current_action = format!("Calling {}", tool);
                    t.current_tool = Some(tool.clone());
                    t.current_query = Some(query.clone());
                });
            }
            E::ToolCompleted { block_id, tool, .. } => {
                self.update_task(block_id, event.timestamp, |t| {
                    t.tools_used.push(tool.clone());
                    t.current_tool = None;
                    t.current_query = None;
                });
            }
            E::ProcessingNotes { block_id, .. } => {
                self.update_task(block_id, event.timestamp, |t| {
                    t.current_action = "Processing notes".to_string();
                });
            }
            E::NewTopicAdded {
                new_block_id, sub_topic, ..
            } => {
                self.task_entry(new_block_id, sub_topic, 0);
                self.total_blocks = self.researching.tasks.len();
            }
            E::IterationCompleted {
                block_id, iteration, ..
            } => {
                self.update_task(block_id, event.timestamp, |t| {
                    t.iteration = *iteration;
                    t.current_action = format!("Iteration {} completed", iteration);
                });
            }
            E::BlockCompleted {
                block_id, iterations, ..
            } => {
                self.update_task(block_id, event.timestamp, |t| {
                    t.status = TaskStatus::Completed;
                    t.iteration = *iterations;
                    t.current_action = "Completed".to_string();
                });
                self.researching.active_task_ids.remove(block_id);
                self.refresh_counts();
            }
            E::BlockFailed { block_id, reason } => {
                let task = self.task_entry(block_id, "", 0);
                task.status = TaskStatus::Failed;
                task.current_action = format!("Failed: {}", reason);
                task.updated_at = event.timestamp;
                self.researching.active_task_ids.remove(block_id);
                self.refresh_counts();
            }
            E::ResearchingCompleted { .. } => {
                self.researching.active_task_ids.clear();
            }
            E::ReportingStarted { .. } => {
                self.reporting.progress = "Deduplicating citations".to_string();
            }
            E::DeduplicateCompleted { unique_citations, .. } => {
                self.reporting.citation_count = *unique_citations;
            }
            E::OutlineCompleted { section_count, .. } => {
                self.reporting.section_count = *section_count;
                self.reporting.progress = "Outline ready".to_string();
            }
            E::WritingSection { index, total, title } => {
                self.reporting.progress = format!("Writing section {}/{}: {}", index, total, title);
            }
            E::WritingCompleted { .. } => {
                self.reporting.progress = "Assembling report".to_string();
            }
            E::ReportingCompleted {
                word_count,
                section_count,
                citation_count,
            } => {
                self.reporting.word_count = *word_count;
                self.reporting.section_count = *section_count;
                self.reporting.citation_count = *citation_count;
                self.reporting.progress = "Report completed".to_string();
            }
            E::ParallelStatusUpdate { .. } | E::Log { .. } | E::Status { .. } => {}
            E::Error { message, .. } => self.log("error", message.clone()),
        }
        true
    }

    fn task_entry(&mut self, block_id: &str, topic: &str, max_iterations: u32) -> &mut TaskState {
        let task = self
            .researching
            .tasks
            .entry(block_id.to_string())
            .or_insert_with(|| TaskState {
                id: block_id.to_string(),
                topic: topic.to_string(),
                status: TaskStatus::Pending,
                iteration: 0,
                max_iterations,
                current_action: "Queued".to_string(),
                tools_used: Vec::new(),
                thoughts: Vec::new(),
                updated_at: Utc::now(),
                current_tool: None,
                current_query: None,
            });
        if max_iterations > 0 {
            task.max_iterations = max_iterations;
        }
        if task.topic.is_empty() {
            task.topic = topic.to_string();
        }
        task
    }

    fn update_task(&mut self, block_id: &str, at: DateTime<Utc>, f: impl FnOnce(&mut TaskState)) {
        if let Some(task) = self.researching.tasks.get_mut(block_id) {
            f(task);
            task.updated_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(id: &str) -> EventPayload {
        EventPayload::BlockStarted {
            block_id: id.to_string(),
            sub_topic: "topic".to_string(),
            max_iterations: 3,
        }
    }

    #[test]
    fn test_sequence_numbers_are_dense() {
        let stream = EventStream::new("r1");
        let a = stream.publish(EventPayload::Status {
            message: "a".to_string(),
        });
        let b = stream.publish(started("block_1"));
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(b.stage, Some(Stage::Researching));
        assert_eq!(b.status.as_deref(), Some("running"));
        assert!(a.stage.is_none());
    }

    #[test]
    fn test_event_wire_shape() {
        let stream = EventStream::new("r1");
        let mut extra = serde_json::Map::new();
        extra.insert("note".to_string(), serde_json::json!("hello"));
        let event = stream.publish_with_extra(
            EventPayload::WritingSection {
                index: 1,
                total: 2,
                title: "Light".to_string(),
            },
            extra,
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "writing_section");
        assert_eq!(json["research_id"], "r1");
        assert_eq!(json["stage"], "reporting");
        assert_eq!(json["index"], 1);
        assert_eq!(json["extra"]["note"], "hello");

        let back: ResearchEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.payload, event.payload);
    }

    #[tokio::test]
    async fn test_subscriber_gets_replay_then_live() {
        let stream = EventStream::new("r1");
        stream.publish(started("block_1"));

        let mut sub = stream.subscribe();
        stream.publish(EventPayload::CheckingSufficiency {
            block_id: "block_1".to_string(),
            iteration: 1,
        });
        stream.close();

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.kind(), "block_started");
        assert_eq!(second.kind(), "checking_sufficiency");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_resyncs_from_history() {
        let stream = EventStream::with_capacity("r1", 2);
        let mut sub = stream.subscribe();
        for i in 0..10 {
            stream.publish(EventPayload::Status {
                message: format!("m{}", i),
            });
        }
        stream.close();

        let mut seqs = Vec::new();
        while let Some(event) = sub.recv().await {
            seqs.push(event.seq);
        }
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_validate_block_sequence() {
        let stream = EventStream::new("r1");
        let id = "block_1".to_string();
        stream.publish(started(&id));
        stream.publish(EventPayload::CheckingSufficiency {
            block_id: id.clone(),
            iteration: 1,
        });
        stream.publish(EventPayload::KnowledgeSufficient {
            block_id: id.clone(),
            iteration: 1,
            reason: "enough".to_string(),
        });
        stream.publish(EventPayload::BlockCompleted {
            block_id: id.clone(),
            iterations: 1,
            citations: 0,
            partial: false,
        });
        assert!(validate_block_sequence(&stream.block_events(&id)).is_ok());

        stream.publish(EventPayload::CheckingSufficiency {
            block_id: id.clone(),
            iteration: 2,
        });
        assert!(validate_block_sequence(&stream.block_events(&id)).is_err());
    }

    #[test]
    fn test_skipped_transition_is_rejected() {
        let stream = EventStream::new("r1");
        stream.publish(started("block_1"));
        stream.publish(EventPayload::ToolCalling {
            block_id: "block_1".to_string(),
            iteration: 1,
            tool: "web_search".to_string(),
            query: "q".to_string(),
            attempt: 1,
        });
        assert!(validate_block_sequence(&stream.block_events("block_1")).is_err());
    }

    #[test]
    fn test_reducer_is_idempotent() {
        let stream = EventStream::new("r1");
        stream.publish(started("block_1"));
        stream.publish(EventPayload::BlockFailed {
            block_id: "block_1".to_string(),
            reason: "cancelled".to_string(),
        });

        let mut once = ResearchState::default();
        let mut twice = ResearchState::default();
        for event in stream.history() {
            once.apply(&event);
            twice.apply(&event);
            assert!(!twice.apply(&event));
        }

        assert_eq!(once.failed_blocks, 1);
        assert_eq!(twice.failed_blocks, 1);
        assert_eq!(
            once.researching.tasks["block_1"].status,
            twice.researching.tasks["block_1"].status
        );
        assert!(twice.researching.active_task_ids.is_empty());
    }
}
