//! Deep Research Pipeline
//!
//! Turns a topic into a cited report in three stages:
//!
//! 1. **Planning** - [`planner::TopicPlanner`] rephrases the topic and
//!    decomposes it into [`types::TopicBlock`]s
//! 2. **Researching** - [`scheduler::BlockScheduler`] drains the block queue
//!    through [`agent::ResearchAgent`] loops, in series or with bounded
//!    concurrency
//! 3. **Reporting** - [`synthesizer::ReportSynthesizer`] deduplicates
//!    citations, outlines and writes the report
//!
//! Every stage announces its transitions on the run's
//! [`events::EventStream`]. [`pipeline::ResearchPipeline`] ties it together.
//!
//! # Usage
//!
//! ```ignore
//! use ares_research::research::pipeline::ResearchPipeline;
//! use ares_research::types::RunRequest;
//!
//! let pipeline = ResearchPipeline::new(llm, tools, config);
//! let run = pipeline.start_run();
//! let mut events = run.events.subscribe();
//!
//! tokio::spawn({
//!     let (pipeline, run) = (pipeline.clone(), run.clone());
//!     async move { pipeline.execute(&run, RunRequest::new("Photosynthesis")).await }
//! });
//!
//! while let Some(event) = events.recv().await {
//!     println!("{} {}", event.seq, event.kind());
//! }
//! ```

/// Research Agent loop for one block.
pub mod agent;
/// Citation ids, deduplication and marker rewriting.
pub mod citations;
/// Ordered event stream and client-side reducer.
pub mod events;
/// Run orchestration.
pub mod pipeline;
/// Topic Planner.
pub mod planner;
/// Prompts for every model call.
pub mod prompts;
/// Block Scheduler.
pub mod scheduler;
/// Report Synthesizer.
pub mod synthesizer;
/// Block id allocation and discovered-topic control.
pub mod topics;
/// Data model.
pub mod types;

pub use events::{EventPayload, EventStream, EventSubscription, ResearchEvent};
pub use pipeline::{ResearchPipeline, ResearchRun, RunStatus};
pub use types::{ExecutionMode, Report, ResearchState, Stage, TopicBlock};
