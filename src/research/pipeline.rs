//! Orchestrator for one research run: planning, researching, reporting.

use super::agent::ResearchAgent;
use super::citations::CitationAllocator;
use super::events::{EventPayload, EventStream};
use super::planner::TopicPlanner;
use super::scheduler::{BlockScheduler, ScheduleOptions};
use super::synthesizer::ReportSynthesizer;
use super::topics::TopicRegistry;
use super::types::{Report, ResearchState, Stage};
use crate::llm::LLMClient;
use crate::tools::ToolRegistry;
use crate::types::{AppError, Result, RunRequest};
use crate::utils::logging;
use crate::utils::toml_config::AresConfig;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Where a run ended up, as seen from outside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Handle on one run: its events, a live state view and its cancellation.
#[derive(Clone)]
pub struct ResearchRun {
    pub id: String,
    pub events: Arc<EventStream>,
    pub state: Arc<RwLock<ResearchState>>,
    pub cancel: CancellationToken,
    status: Arc<RwLock<RunStatus>>,
    report: Arc<RwLock<Option<Report>>>,
}

impl ResearchRun {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            events: EventStream::new(id.clone()),
            state: Arc::new(RwLock::new(ResearchState::new(id.clone()))),
            cancel: CancellationToken::new(),
            status: Arc::new(RwLock::new(RunStatus::Running)),
            report: Arc::new(RwLock::new(None)),
            id,
        }
    }

    /// Send the run's single cancellation signal.
    pub fn cancel(&self) {
        tracing::info!(research_id = %self.id, "Cancellation requested");
        self.cancel.cancel();
    }

    pub fn snapshot(&self) -> ResearchState {
        self.state.read().clone()
    }

    pub fn status(&self) -> RunStatus {
        self.status.read().clone()
    }

    pub fn report(&self) -> Option<Report> {
        self.report.read().clone()
    }

    pub(crate) fn finish(&self, status: RunStatus) {
        *self.status.write() = status;
        self.events.close();
    }
}

/// Per-run settings after applying the request on top of the config.
#[derive(Debug, Clone)]
struct RunSettings {
    topic: String,
    options: ScheduleOptions,
}

#[derive(Clone)]
pub struct ResearchPipeline {
    llm: Arc<dyn LLMClient>,
    tools: Arc<ToolRegistry>,
    config: Arc<AresConfig>,
}

impl ResearchPipeline {
    pub fn new(llm: Arc<dyn LLMClient>, tools: Arc<ToolRegistry>, config: AresConfig) -> Self {
        Self {
            llm,
            tools,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AresConfig {
        &self.config
    }

    /// Create a run handle with a fresh id. Subscribe to its events before
    /// calling [`ResearchPipeline::execute`] to see everything live.
    pub fn start_run(&self) -> ResearchRun {
        ResearchRun::new(uuid::Uuid::new_v4().to_string())
    }

    /// Reject a request before a run is started for it.
    pub fn validate(&self, request: &RunRequest) -> Result<()> {
        self.settings(request).map(|_| ())
    }

    /// Check a request and merge it with the configured defaults.
    fn settings(&self, request: &RunRequest) -> Result<RunSettings> {
        self.config.validate()?;

        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(AppError::InvalidInput("topic must not be empty".to_string()));
        }

        let research = &self.config.research;
        let max_iterations = request.max_iterations.unwrap_or(research.max_iterations);
        if max_iterations == 0 {
            return Err(AppError::InvalidInput("max_iterations must be at least 1".to_string()));
        }
        if request.iteration_overrides.values().any(|n| *n == 0) {
            return Err(AppError::InvalidInput(
                "per-block iteration overrides must be at least 1".to_string(),
            ));
        }
        let max_concurrency = request.max_concurrency.unwrap_or(research.max_concurrency);
        if max_concurrency == 0 {
            return Err(AppError::InvalidInput("max_concurrency must be at least 1".to_string()));
        }

        Ok(RunSettings {
            topic: topic.to_string(),
            options: ScheduleOptions {
                mode: request.mode.unwrap_or(research.mode),
                max_concurrency,
                max_iterations,
                status_interval: research.status_interval(),
            },
        })
    }

    /// Plan, research and report. Convenience wrapper around
    /// [`ResearchPipeline::start_run`] and [`ResearchPipeline::execute`].
    pub async fn run(&self, request: RunRequest) -> Result<Report> {
        let run = self.start_run();
        self.execute(&run, request).await
    }

    /// Drive `run` to its end. The event stream is closed on every exit path.
    pub async fn execute(&self, run: &ResearchRun, request: RunRequest) -> Result<Report> {
        let _bridge = logging::attach(&run.events);
        let span = tracing::info_span!("research", research_id = %run.id);
        let result = self.execute_inner(run, request).instrument(span).await;

        match &result {
            Ok(_) => run.finish(RunStatus::Completed),
            Err(AppError::Cancelled) => {
                run.events.publish(EventPayload::Status {
                    message: "Research cancelled".to_string(),
                });
                run.state.write().log("warn", "Research cancelled");
                run.finish(RunStatus::Cancelled);
            }
            Err(e) => {
                run.events.publish(EventPayload::Error {
                    message: e.to_string(),
                    fatal: true,
                    block_id: None,
                });
                run.state.write().log("error", e.to_string());
                run.finish(RunStatus::Failed(e.to_string()));
            }
        }
        result
    }

    async fn execute_inner(&self, run: &ResearchRun, request: RunRequest) -> Result<Report> {
        let settings = self.settings(&request)?;
        let research = self.config.research.clone();

        {
            let mut state = run.state.write();
            state.stage = Stage::Planning;
            state.started_at = Some(Utc::now());
            state.planning.original_topic = settings.topic.clone();
            state.planning.progress = "Planning".to_string();
        }
        tracing::info!(
            topic = %settings.topic,
            mode = %settings.options.mode,
            model = self.llm.model_name(),
            "Research run started"
        );

        let topics = Arc::new(TopicRegistry::new(research.max_discovered_blocks));
        let planner = TopicPlanner::new(
            Arc::clone(&self.llm),
            Arc::clone(&topics),
            Arc::clone(&run.events),
            research.clone(),
        );
        let (optimized, mut blocks) = planner.plan(&settings.topic, &run.cancel).await?;

        for block in &mut blocks {
            if let Some(n) = request.iteration_overrides.get(&block.id) {
                block.max_iterations = Some(*n);
            }
        }

        {
            let mut state = run.state.write();
            state.planning.optimized_topic = optimized.clone();
            state.planning.sub_topics = blocks.iter().map(|b| b.sub_topic.clone()).collect();
            state.planning.progress = "Planning completed".to_string();
            state.stage = Stage::Researching;
        }

        let agent = ResearchAgent::new(
            Arc::clone(&self.llm),
            Arc::clone(&self.tools),
            Arc::new(CitationAllocator::new()),
            topics,
            Arc::clone(&run.events),
            research.clone(),
        );
        let scheduler = BlockScheduler::new(agent, Arc::clone(&run.events), Arc::clone(&run.state));
        let blocks = scheduler
            .run(blocks, &optimized, &settings.options, &run.cancel)
            .await?;

        if run.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        {
            let mut state = run.state.write();
            state.stage = Stage::Reporting;
            state.reporting.progress = "Reporting".to_string();
        }

        let synthesizer = ReportSynthesizer::new(
            Arc::clone(&self.llm),
            Arc::clone(&run.events),
            research,
            self.config.reporting.clone(),
        );
        let report = synthesizer.synthesize(&optimized, &blocks, &run.cancel).await?;

        {
            let mut state = run.state.write();
            state.reporting.outline = Some(report.outline.clone());
            state.reporting.report = Some(report.text.clone());
            state.reporting.word_count = report.word_count;
            state.reporting.section_count = report.section_count;
            state.reporting.citation_count = report.citation_count;
            state.reporting.progress = "Report completed".to_string();
            state.stage = Stage::Completed;
        }
        *run.report.write() = Some(report.clone());

        Ok(report)
    }
}
