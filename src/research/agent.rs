//! Research Agent: the bounded loop for one block.
//!
//! ```text
//! checking_sufficiency -> generating_query -> tool_calling -> processing_notes -> iteration_completed
//!          ^                                                                              |
//!          +------------------------------------------------------------------------------+
//! ```
//!
//! The loop ends when the model judges the notes sufficient, when the
//! iteration budget is spent (still `completed`, with partial knowledge),
//! or on a tool/model error that survives its single retry (`failed`).
//!
//! The agent owns its [`TopicBlock`] and [`TaskState`] exclusively and
//! reports to the scheduler through [`AgentMessage`]s. Every step records a
//! [`ThoughtEntry`] before the matching event is published.

use super::citations::CitationAllocator;
use super::events::{EventPayload, EventStream};
use super::planner::SubTopicSpec;
use super::prompts;
use super::topics::TopicRegistry;
use super::types::{BlockStatus, TaskState, TaskStatus, ThoughtEntry, ThoughtKind, ToolTrace, TopicBlock};
use crate::llm::{generate_json, parse_json_response, LLMClient};
use crate::tools::ToolRegistry;
use crate::types::{AppError, Result};
use crate::utils::toml_config::ResearchConfig;
use chrono::Utc;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Run `call` under a timeout and the run's cancellation token, with up to
/// `attempts` tries for retryable errors.
///
/// `call` receives the 1-based attempt number.
pub(crate) async fn guarded<T, F, Fut>(
    operation: &str,
    timeout: Duration,
    attempts: u32,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            outcome = tokio::time::timeout(timeout, call(attempt)) => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_retryable() => e,
            Ok(Err(e)) => return Err(e),
            Err(_) => AppError::Timeout {
                operation: operation.to_string(),
                seconds: timeout.as_secs(),
            },
        };

        if attempt >= attempts {
            return Err(error);
        }
        tracing::warn!(operation, attempt, error = %error, "Call failed, retrying");
        attempt += 1;
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
///
/// Returns the original size in chars when truncation happened.
pub(crate) fn truncate_chars(text: String, max_chars: usize) -> (String, Option<usize>) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let size = text.chars().count();
            (text[..idx].to_string(), Some(size))
        }
        None => (text, None),
    }
}

/// Messages from an agent to the scheduler.
#[derive(Debug, Clone)]
pub enum AgentMessage {
    /// Fresh snapshot of the agent's task view.
    Task(TaskState),
    /// A sub-topic surfaced mid-research, to be queued.
    Discovered(TopicBlock),
}

/// How a block's loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Sufficient,
    BudgetExhausted,
    Failed(String),
    Cancelled,
}

impl BlockOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, BlockOutcome::Sufficient | BlockOutcome::BudgetExhausted)
    }
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub block: TopicBlock,
    pub task: TaskState,
    pub outcome: BlockOutcome,
}

/// Per-dispatch context handed to [`ResearchAgent::research`].
#[derive(Clone)]
pub struct AgentContext {
    /// Optimized topic of the run.
    pub topic: String,
    pub tx: UnboundedSender<AgentMessage>,
    pub cancel: CancellationToken,
    /// Run-wide budget, used when the block carries no override.
    pub max_iterations: u32,
}

#[derive(Debug, Deserialize)]
struct SufficiencyReply {
    sufficient: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct QueryReply {
    query: String,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NoteReply {
    note: String,
    #[serde(default)]
    new_topic: Option<SubTopicSpec>,
}

#[derive(Clone)]
pub struct ResearchAgent {
    llm: Arc<dyn LLMClient>,
    tools: Arc<ToolRegistry>,
    citations: Arc<CitationAllocator>,
    topics: Arc<TopicRegistry>,
    events: Arc<EventStream>,
    config: ResearchConfig,
}

impl ResearchAgent {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        tools: Arc<ToolRegistry>,
        citations: Arc<CitationAllocator>,
        topics: Arc<TopicRegistry>,
        events: Arc<EventStream>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            citations,
            topics,
            events,
            config,
        }
    }

    /// Record the thought, publish the event, then push a task snapshot.
    fn step(&self, task: &mut TaskState, ctx: &AgentContext, thought: ThoughtEntry, payload: EventPayload) {
        task.record(thought);
        self.events.publish(payload);
        let _ = ctx.tx.send(AgentMessage::Task(task.clone()));
    }

    /// Research one block to a terminal status.
    pub async fn research(&self, mut block: TopicBlock, ctx: AgentContext) -> AgentOutcome {
        let max_iterations = block.max_iterations.unwrap_or(ctx.max_iterations).max(1);
        let mut task = TaskState::for_block(&block, max_iterations);

        if !block.transition(BlockStatus::Researching) {
            let reason = format!("block {} is not pending", block.id);
            return AgentOutcome {
                block,
                task,
                outcome: BlockOutcome::Failed(reason),
            };
        }

        task.status = TaskStatus::Running;
        task.set_action("Started");
        self.step(
            &mut task,
            &ctx,
            ThoughtEntry::new(ThoughtKind::Plan, format!("Researching '{}'", block.sub_topic)),
            EventPayload::BlockStarted {
                block_id: block.id.clone(),
                sub_topic: block.sub_topic.clone(),
                max_iterations,
            },
        );
        tracing::debug!(block_id = %block.id, max_iterations, "Block started");

        let result = self.run_loop(&mut block, &mut task, &ctx, max_iterations).await;

        let outcome = match result {
            Ok(outcome) => {
                let partial = outcome == BlockOutcome::BudgetExhausted;
                block.transition(BlockStatus::Completed);
                if partial {
                    block
                        .metadata
                        .insert("partial".to_string(), serde_json::Value::Bool(true));
                }
                task.status = TaskStatus::Completed;
                task.current_tool = None;
                task.current_query = None;
                task.set_action("Completed");
                let summary = if partial {
                    format!(
                        "Iteration budget of {} exhausted; findings are partial",
                        max_iterations
                    )
                } else {
                    "Knowledge sufficient".to_string()
                };
                self.step(
                    &mut task,
                    &ctx,
                    ThoughtEntry::new(ThoughtKind::Note, summary),
                    EventPayload::BlockCompleted {
                        block_id: block.id.clone(),
                        iterations: block.iteration_count,
                        citations: block.tool_traces.len(),
                        partial,
                    },
                );
                tracing::info!(
                    block_id = %block.id,
                    iterations = block.iteration_count,
                    partial,
                    "Block completed"
                );
                outcome
            }
            Err(error) => {
                let (reason, outcome) = match error {
                    AppError::Cancelled => ("cancelled".to_string(), BlockOutcome::Cancelled),
                    other => {
                        let reason = other.to_string();
                        (reason.clone(), BlockOutcome::Failed(reason))
                    }
                };
                block.fail(reason.clone());
                task.status = TaskStatus::Failed;
                task.set_action(format!("Failed: {}", reason));
                self.step(
                    &mut task,
                    &ctx,
                    ThoughtEntry::new(ThoughtKind::Error, reason.clone()),
                    EventPayload::BlockFailed {
                        block_id: block.id.clone(),
                        reason: reason.clone(),
                    },
                );
                if outcome == BlockOutcome::Cancelled {
                    tracing::info!(block_id = %block.id, "Block cancelled");
                } else {
                    tracing::error!(block_id = %block.id, reason = %reason, "Block failed");
                }
                outcome
            }
        };

        AgentOutcome {
            block,
            task,
            outcome,
        }
    }

    async fn run_loop(
        &self,
        block: &mut TopicBlock,
        task: &mut TaskState,
        ctx: &AgentContext,
        max_iterations: u32,
    ) -> Result<BlockOutcome> {
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            block.iteration_count += 1;
            block.updated_at = Utc::now();
            let iteration = block.iteration_count;
            task.iteration = iteration;

            // ---- sufficiency ----
            task.set_action("Checking knowledge sufficiency");
            self.step(
                task,
                ctx,
                ThoughtEntry::new(
                    ThoughtKind::Sufficiency,
                    format!("Iteration {}: checking {} notes", iteration, block.tool_traces.len()),
                ),
                EventPayload::CheckingSufficiency {
                    block_id: block.id.clone(),
                    iteration,
                },
            );

            let verdict = self.check_sufficiency(block, ctx).await?;
            if verdict.sufficient {
                task.set_action("Knowledge sufficient");
                self.step(
                    task,
                    ctx,
                    ThoughtEntry::new(ThoughtKind::Sufficiency, verdict.reason.clone()),
                    EventPayload::KnowledgeSufficient {
                        block_id: block.id.clone(),
                        iteration,
                        reason: verdict.reason,
                    },
                );
                return Ok(BlockOutcome::Sufficient);
            }
            task.record(ThoughtEntry::new(
                ThoughtKind::Sufficiency,
                format!("Not sufficient yet: {}", verdict.reason),
            ));

            // ---- query ----
            task.set_action("Generating query");
            self.step(
                task,
                ctx,
                ThoughtEntry::new(ThoughtKind::Plan, "Formulating the next query"),
                EventPayload::GeneratingQuery {
                    block_id: block.id.clone(),
                    iteration,
                },
            );
            let (tool, query) = self.next_query(block, task, ctx).await?;

            // ---- tool call ----
            let output = guarded(
                &format!("tool '{}'", tool),
                self.config.tool_timeout(),
                self.config.max_attempts,
                &ctx.cancel,
                |attempt| {
                    task.current_tool = Some(tool.clone());
                    task.current_query = Some(query.clone());
                    task.set_action(format!("Calling {}", tool));
                    self.step(
                        task,
                        ctx,
                        ThoughtEntry::new(ThoughtKind::ToolCall, format!("{}: {}", tool, query))
                            .with_metadata(serde_json::json!({ "attempt": attempt })),
                        EventPayload::ToolCalling {
                            block_id: block.id.clone(),
                            iteration,
                            tool: tool.clone(),
                            query: query.clone(),
                            attempt,
                        },
                    );
                    let tools = Arc::clone(&self.tools);
                    let (tool, query) = (tool.clone(), query.clone());
                    async move { tools.execute(&tool, &query).await }
                },
            )
            .await?;

            let (raw_answer, original_size) =
                truncate_chars(output.raw, self.config.max_raw_answer_chars);
            task.tools_used.push(tool.clone());
            task.current_tool = None;
            task.current_query = None;
            self.step(
                task,
                ctx,
                ThoughtEntry::new(ThoughtKind::ToolCall, format!("Result: {}", output.summary)),
                EventPayload::ToolCompleted {
                    block_id: block.id.clone(),
                    iteration,
                    tool: tool.clone(),
                    summary: output.summary.clone(),
                },
            );

            // ---- notes ----
            task.set_action("Processing notes");
            self.step(
                task,
                ctx,
                ThoughtEntry::new(ThoughtKind::Note, "Integrating result into notes"),
                EventPayload::ProcessingNotes {
                    block_id: block.id.clone(),
                    iteration,
                },
            );
            let reply = self
                .integrate_note(block, ctx, &query, &output.summary, &raw_answer)
                .await?;

            // Ids are minted only for results that make it into a trace.
            let citation_id = self.citations.allocate();
            let note = format!("{} [cit:{}]", reply.note.trim(), citation_id);

            block.tool_traces.push(ToolTrace {
                tool_id: format!("{}-tool-{}", block.id, block.tool_traces.len() + 1),
                citation_id,
                tool_type: tool.clone(),
                query: query.clone(),
                raw_answer,
                original_size,
                summary: output.summary,
                note: note.clone(),
                timestamp: Utc::now(),
            });
            task.record(ThoughtEntry::new(ThoughtKind::Note, note));

            if let Some(spec) = reply.new_topic {
                if let Some(discovered) = self.topics.discover(&spec.sub_topic, &spec.overview) {
                    self.step(
                        task,
                        ctx,
                        ThoughtEntry::new(
                            ThoughtKind::Plan,
                            format!("Discovered sub-topic '{}'", discovered.sub_topic),
                        ),
                        EventPayload::NewTopicAdded {
                            block_id: block.id.clone(),
                            new_block_id: discovered.id.clone(),
                            sub_topic: discovered.sub_topic.clone(),
                        },
                    );
                    tracing::debug!(
                        block_id = %block.id,
                        new_block_id = %discovered.id,
                        "New sub-topic discovered"
                    );
                    let _ = ctx.tx.send(AgentMessage::Discovered(discovered));
                }
            }

            task.set_action(format!("Iteration {} completed", iteration));
            self.step(
                task,
                ctx,
                ThoughtEntry::new(ThoughtKind::Plan, format!("Iteration {} completed", iteration)),
                EventPayload::IterationCompleted {
                    block_id: block.id.clone(),
                    iteration,
                    citation_id,
                },
            );

            if iteration >= max_iterations {
                return Ok(BlockOutcome::BudgetExhausted);
            }
        }
    }

    async fn check_sufficiency(&self, block: &TopicBlock, ctx: &AgentContext) -> Result<SufficiencyReply> {
        let prompt =
            prompts::sufficiency_prompt(&ctx.topic, &block.sub_topic, &block.overview, &block.notes());
        guarded(
            "sufficiency check",
            self.config.llm_timeout(),
            self.config.max_attempts,
            &ctx.cancel,
            |_| generate_json::<SufficiencyReply>(self.llm.as_ref(), prompts::SUFFICIENCY_SYSTEM, &prompt),
        )
        .await
    }

    /// Ask for the next `(tool, query)`. Unparsable replies fall back to the
    /// reply text as the query and the configured default tool.
    async fn next_query(
        &self,
        block: &TopicBlock,
        task: &mut TaskState,
        ctx: &AgentContext,
    ) -> Result<(String, String)> {
        let previous: Vec<&str> = block.tool_traces.iter().map(|t| t.query.as_str()).collect();
        let prompt = prompts::query_prompt(
            &block.sub_topic,
            &block.overview,
            &block.notes(),
            &previous,
            &self.tools.describe(),
        );
        let text = guarded(
            "query generation",
            self.config.llm_timeout(),
            self.config.max_attempts,
            &ctx.cancel,
            |_| self.llm.generate_with_system(prompts::QUERY_SYSTEM, &prompt),
        )
        .await?;

        let (query, requested, rationale) = match parse_json_response::<QueryReply>(&text) {
            Ok(reply) if !reply.query.trim().is_empty() => {
                (reply.query.trim().to_string(), reply.tool, reply.rationale)
            }
            _ => {
                let line = text.lines().map(str::trim).find(|l| !l.is_empty());
                let query = line.unwrap_or(block.sub_topic.as_str()).to_string();
                (query, None, None)
            }
        };

        let tool = self.resolve_tool(requested.as_deref())?;
        let mut thought = ThoughtEntry::new(ThoughtKind::Plan, format!("Next: {} '{}'", tool, query));
        if let Some(rationale) = rationale {
            thought = thought.with_metadata(serde_json::json!({ "rationale": rationale }));
        }
        task.record(thought);
        Ok((tool, query))
    }

    fn resolve_tool(&self, requested: Option<&str>) -> Result<String> {
        if let Some(name) = requested.map(str::trim) {
            if self.tools.has_tool(name) {
                return Ok(name.to_string());
            }
            tracing::debug!(tool = name, "Requested tool not registered, using default");
        }
        if self.tools.has_tool(&self.config.default_tool) {
            return Ok(self.config.default_tool.clone());
        }
        self.tools
            .tool_names()
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Tool("no tools registered".to_string()))
    }

    /// Unparsable replies keep the tool summary as the note.
    async fn integrate_note(
        &self,
        block: &TopicBlock,
        ctx: &AgentContext,
        query: &str,
        summary: &str,
        raw: &str,
    ) -> Result<NoteReply> {
        let prompt = prompts::note_prompt(&ctx.topic, &block.sub_topic, query, summary, raw);
        let text = guarded(
            "note integration",
            self.config.llm_timeout(),
            self.config.max_attempts,
            &ctx.cancel,
            |_| self.llm.generate_with_system(prompts::NOTE_SYSTEM, &prompt),
        )
        .await?;

        match parse_json_response::<NoteReply>(&text) {
            Ok(reply) if !reply.note.trim().is_empty() => Ok(reply),
            _ => Ok(NoteReply {
                note: summary.to_string(),
                new_topic: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_truncate_chars() {
        let (text, size) = truncate_chars("héllo wörld".to_string(), 4);
        assert_eq!(text, "héll");
        assert_eq!(size, Some(11));

        let (text, size) = truncate_chars("short".to_string(), 10);
        assert_eq!(text, "short");
        assert!(size.is_none());
    }

    #[tokio::test]
    async fn test_guarded_retries_once() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<u32> = guarded("test", Duration::from_secs(1), 2, &cancel, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 1 {
                    Err(AppError::LLM("flaky".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_guarded_times_out() {
        let cancel = CancellationToken::new();
        let result: Result<()> = guarded("slow", Duration::from_millis(10), 2, &cancel, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_guarded_does_not_retry_hard_errors() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<()> = guarded("hard", Duration::from_secs(1), 2, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::InvalidInput("bad".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_guarded_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = guarded("cancelled", Duration::from_secs(1), 2, &cancel, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
