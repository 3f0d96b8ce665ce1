//! Block Scheduler: drains the block queue through research agents.
//!
//! The scheduler is the only writer of the run-level research state
//! (`tasks`, `active_task_ids`, block counts). Agents run as spawned tasks
//! and talk back over an unbounded channel, so a discovered sub-topic is
//! just another queue entry and never something its discoverer waits on.

use super::agent::{AgentContext, AgentMessage, AgentOutcome, ResearchAgent};
use super::events::{ActiveTask, EventPayload, EventStream};
use super::types::{BlockStatus, ExecutionMode, ResearchState, TaskState, TaskStatus, TopicBlock};
use crate::types::{AppError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Per-run scheduling parameters.
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub mode: ExecutionMode,
    /// Worker slots in parallel mode; series mode always uses one.
    pub max_concurrency: usize,
    pub max_iterations: u32,
    pub status_interval: Duration,
}

impl ScheduleOptions {
    pub fn worker_slots(&self) -> usize {
        match self.mode {
            ExecutionMode::Series => 1,
            ExecutionMode::Parallel => self.max_concurrency.max(1),
        }
    }
}

pub struct BlockScheduler {
    agent: ResearchAgent,
    events: Arc<EventStream>,
    state: Arc<RwLock<ResearchState>>,
}

fn block_ordinal(id: &str) -> u64 {
    id.rsplit('_').next().and_then(|n| n.parse().ok()).unwrap_or(u64::MAX)
}

impl BlockScheduler {
    pub fn new(agent: ResearchAgent, events: Arc<EventStream>, state: Arc<RwLock<ResearchState>>) -> Self {
        Self { agent, events, state }
    }

    /// Research every block, returning them all in a terminal status.
    ///
    /// Errors with [`AppError::Cancelled`] when the token fires and with
    /// [`AppError::NoCompletedBlocks`] when the queue drains without a
    /// single completed block.
    pub async fn run(
        &self,
        blocks: Vec<TopicBlock>,
        topic: &str,
        options: &ScheduleOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<TopicBlock>> {
        let slots = options.worker_slots();
        let (tx, mut rx) = mpsc::unbounded_channel::<AgentMessage>();

        let mut queue: VecDeque<TopicBlock> = blocks.into();
        let mut dispatched: HashMap<String, TopicBlock> = HashMap::new();
        let mut finished: Vec<TopicBlock> = Vec::new();
        let mut in_flight = FuturesUnordered::new();

        {
            let mut state = self.state.write();
            state.researching.mode = options.mode;
            state.researching.max_concurrency = slots;
            for block in &queue {
                self.register(&mut state, block, options.max_iterations);
            }
            state.refresh_counts();
        }

        self.events.publish(EventPayload::ResearchingStarted {
            mode: options.mode,
            max_concurrency: slots,
            total_blocks: queue.len(),
        });
        tracing::info!(
            research_id = %self.events.research_id(),
            mode = %options.mode,
            slots,
            blocks = queue.len(),
            "Researching started"
        );

        let interval = options.status_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        let report_status = options.mode == ExecutionMode::Parallel;

        loop {
            while let Ok(message) = rx.try_recv() {
                self.handle_message(message, &mut queue, options.max_iterations);
            }

            while in_flight.len() < slots && !cancel.is_cancelled() {
                let Some(block) = queue.pop_front() else {
                    break;
                };
                let id = block.id.clone();
                dispatched.insert(id.clone(), block.clone());
                self.state.write().researching.active_task_ids.insert(id.clone());

                let agent = self.agent.clone();
                let ctx = AgentContext {
                    topic: topic.to_string(),
                    tx: tx.clone(),
                    cancel: cancel.clone(),
                    max_iterations: options.max_iterations,
                };
                // Agents log under the run's span so their records stay run-scoped.
                let handle = tokio::spawn(
                    async move { agent.research(block, ctx).await }.instrument(tracing::Span::current()),
                );
                in_flight.push(async move { (id, handle.await) });
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some(message) = rx.recv() => {
                    self.handle_message(message, &mut queue, options.max_iterations);
                }
                Some((id, joined)) = in_flight.next() => {
                    let block = self.handle_completion(id, joined, &mut dispatched);
                    finished.push(block);
                }
                _ = ticker.tick(), if report_status => {
                    self.publish_status(queue.len());
                }
            }
        }

        while let Ok(message) = rx.try_recv() {
            self.handle_message(message, &mut queue, options.max_iterations);
        }

        let cancelled = cancel.is_cancelled();
        for mut block in queue.drain(..) {
            block.fail("cancelled");
            self.events.publish(EventPayload::BlockFailed {
                block_id: block.id.clone(),
                reason: "cancelled".to_string(),
            });
            self.mark_failed(&block.id, "cancelled");
            finished.push(block);
        }

        finished.sort_by_key(|b| block_ordinal(&b.id));

        let completed = finished
            .iter()
            .filter(|b| b.status == BlockStatus::Completed)
            .count();
        let failed = finished.len() - completed;
        {
            let mut state = self.state.write();
            state.researching.active_task_ids.clear();
            state.refresh_counts();
        }

        if cancelled {
            tracing::info!(
                research_id = %self.events.research_id(),
                completed,
                failed,
                "Researching cancelled"
            );
            return Err(AppError::Cancelled);
        }

        self.events.publish(EventPayload::ResearchingCompleted {
            total: finished.len(),
            completed,
            failed,
        });
        tracing::info!(
            research_id = %self.events.research_id(),
            completed,
            failed,
            "Researching completed"
        );

        if completed == 0 {
            return Err(AppError::NoCompletedBlocks);
        }
        Ok(finished)
    }

    fn register(&self, state: &mut ResearchState, block: &TopicBlock, max_iterations: u32) {
        let budget = block.max_iterations.unwrap_or(max_iterations);
        state
            .researching
            .tasks
            .insert(block.id.clone(), TaskState::for_block(block, budget));
    }

    fn handle_message(&self, message: AgentMessage, queue: &mut VecDeque<TopicBlock>, max_iterations: u32) {
        match message {
            AgentMessage::Task(task) => {
                let mut state = self.state.write();
                let settled = state
                    .researching
                    .tasks
                    .get(&task.id)
                    .is_some_and(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed));
                if settled {
                    return;
                }
                state.researching.tasks.insert(task.id.clone(), task);
                state.refresh_counts();
            }
            AgentMessage::Discovered(block) => {
                let mut state = self.state.write();
                self.register(&mut state, &block, max_iterations);
                state.refresh_counts();
                queue.push_back(block);
            }
        }
    }

    fn handle_completion(
        &self,
        id: String,
        joined: std::result::Result<AgentOutcome, JoinError>,
        dispatched: &mut HashMap<String, TopicBlock>,
    ) -> TopicBlock {
        let snapshot = dispatched.remove(&id);
        let mut state = self.state.write();
        state.researching.active_task_ids.remove(&id);

        let block = match joined {
            Ok(outcome) => {
                state.researching.tasks.insert(id, outcome.task);
                outcome.block
            }
            Err(e) => {
                let reason = format!("agent task aborted: {}", e);
                tracing::error!(block_id = %id, reason = %reason, "Research agent crashed");
                let mut block = snapshot.unwrap_or_else(|| TopicBlock::new(id.clone(), "", ""));
                block.transition(BlockStatus::Researching);
                block.fail(reason.clone());
                self.events.publish(EventPayload::BlockFailed {
                    block_id: id.clone(),
                    reason: reason.clone(),
                });
                if let Some(task) = state.researching.tasks.get_mut(&id) {
                    task.status = TaskStatus::Failed;
                    task.set_action(format!("Failed: {}", reason));
                }
                block
            }
        };
        state.refresh_counts();
        block
    }

    fn mark_failed(&self, block_id: &str, reason: &str) {
        let mut state = self.state.write();
        if let Some(task) = state.researching.tasks.get_mut(block_id) {
            task.status = TaskStatus::Failed;
            task.set_action(format!("Failed: {}", reason));
        }
    }

    fn publish_status(&self, queued: usize) {
        let payload = {
            let state = self.state.read();
            let active = state
                .researching
                .active_task_ids
                .iter()
                .filter_map(|id| state.researching.tasks.get(id))
                .map(|task| ActiveTask {
                    block_id: task.id.clone(),
                    iteration: task.iteration,
                    tool: task.current_tool.clone(),
                    query: task.current_query.clone(),
                })
                .collect();
            EventPayload::ParallelStatusUpdate {
                active,
                queued,
                completed: state.completed_blocks,
                failed: state.failed_blocks,
            }
        };
        self.events.publish(payload);
    }
}
