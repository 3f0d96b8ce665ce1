mod common;

use ares_research::research::events::{validate_block_sequence, EventPayload, ResearchEvent};
use ares_research::research::prompts;
use ares_research::research::types::{ExecutionMode, ResearchState, Stage, TaskStatus};
use ares_research::research::{ResearchPipeline, RunStatus};
use ares_research::types::{AppError, RunRequest};
use common::mocks::{test_config, MockTool, ScriptedLLM};
use ares_research::utils::logging::EventLogLayer;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;

fn pipeline(llm: ScriptedLLM, tool: &Arc<MockTool>) -> ResearchPipeline {
    ResearchPipeline::new(Arc::new(llm), tool.registry(), test_config())
}

fn stage_rank(stage: Stage) -> u8 {
    match stage {
        Stage::Idle => 0,
        Stage::Planning => 1,
        Stage::Researching => 2,
        Stage::Reporting => 3,
        Stage::Completed => 4,
    }
}

fn assert_well_ordered(history: &[ResearchEvent]) {
    for pair in history.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1, "sequence numbers must be gapless");
    }
    let ranks: Vec<u8> = history.iter().filter_map(|e| e.stage).map(stage_rank).collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "stages went backwards: {:?}", ranks);
}

fn block_completed(history: &[ResearchEvent], block: &str) -> Option<(u32, usize, bool)> {
    history.iter().find_map(|e| match &e.payload {
        EventPayload::BlockCompleted {
            block_id,
            iterations,
            citations,
            partial,
        } if block_id == block => Some((*iterations, *citations, *partial)),
        _ => None,
    })
}

#[tokio::test]
async fn test_series_run_end_to_end() {
    let tool = Arc::new(MockTool::new());
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions", "Calvin cycle"])
        .sufficient_after("Light reactions", 1);
    let pipeline = pipeline(llm, &tool);

    let run = pipeline.start_run();
    let mut request = RunRequest::new("Photosynthesis");
    request.max_iterations = Some(3);
    request.mode = Some(ExecutionMode::Series);

    let report = pipeline.execute(&run, request).await.unwrap();

    let history = run.events.history();
    assert_well_ordered(&history);
    assert!(run.events.is_closed());
    assert_eq!(run.status(), RunStatus::Completed);

    assert_eq!(block_completed(&history, "block_1"), Some((2, 1, false)));
    assert_eq!(block_completed(&history, "block_2"), Some((3, 3, true)));
    for id in ["block_1", "block_2"] {
        validate_block_sequence(&run.events.block_events(id)).unwrap();
    }

    let position = |kind: &str, block: &str| {
        history
            .iter()
            .position(|e| e.kind() == kind && e.block_id() == Some(block))
            .unwrap()
    };
    assert!(position("block_completed", "block_1") < position("block_started", "block_2"));

    assert_eq!(report.citation_count, 4);
    assert_eq!(report.section_count, 2);
    assert!(report.text.contains("## References"));
    assert!(!report.text.contains("[cit:"));
    assert_eq!(history.last().unwrap().kind(), "reporting_completed");

    let state = run.snapshot();
    assert_eq!(state.stage, Stage::Completed);
    assert_eq!(state.planning.optimized_topic, "Photosynthesis: mechanisms and significance");
    assert_eq!(state.completed_blocks, 2);
    assert_eq!(state.reporting.citation_count, 4);
    assert_eq!(run.report().unwrap().text, report.text);
}

#[tokio::test]
async fn test_parallel_run_survives_a_timed_out_block() {
    let tool = Arc::new(
        MockTool::new()
            .with_delay(Duration::from_millis(50))
            .hanging_on("Calvin cycle"),
    );
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions", "Calvin cycle", "Stomata"])
        .sufficient_after("Light reactions", 1)
        .sufficient_after("Stomata", 1);
    let pipeline = pipeline(llm, &tool);

    let run = pipeline.start_run();
    let mut request = RunRequest::new("Photosynthesis");
    request.mode = Some(ExecutionMode::Parallel);
    request.max_concurrency = Some(2);

    let report = pipeline.execute(&run, request).await.unwrap();
    let history = run.events.history();
    assert_well_ordered(&history);
    assert!(tool.max_concurrent() <= 2);

    let block_2 = run.events.block_events("block_2");
    validate_block_sequence(&block_2).unwrap();
    let attempts: Vec<u32> = block_2
        .iter()
        .filter_map(|e| match e.payload {
            EventPayload::ToolCalling { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);
    match &block_2.last().unwrap().payload {
        EventPayload::BlockFailed { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("block_2 ended with {:?}", other),
    }

    let researched = history
        .iter()
        .find_map(|e| match e.payload {
            EventPayload::ResearchingCompleted {
                total,
                completed,
                failed,
            } => Some((total, completed, failed)),
            _ => None,
        })
        .unwrap();
    assert_eq!(researched, (3, 2, 1));
    assert!(history.iter().any(|e| e.kind() == "parallel_status_update"));
    assert!(history.iter().any(|e| e.kind() == "reporting_started"));
    assert_eq!(report.citation_count, 2);

    let state = run.snapshot();
    assert_eq!(state.failed_blocks, 1);
    assert_eq!(state.researching.tasks["block_2"].status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_cancellation_stops_before_reporting() {
    let tool = Arc::new(MockTool::new().hanging_on("query"));
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions", "Calvin cycle"]);
    let pipeline = pipeline(llm, &tool);

    let run = pipeline.start_run();
    let mut events = run.events.subscribe();
    let task = tokio::spawn({
        let (pipeline, run) = (pipeline.clone(), run.clone());
        async move { pipeline.execute(&run, RunRequest::new("Photosynthesis")).await }
    });

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        if event.kind() == "tool_calling" {
            run.cancel();
        }
        seen.push(event);
    }

    let result = task.await.unwrap();
    assert!(matches!(result, Err(AppError::Cancelled)));
    assert_eq!(run.status(), RunStatus::Cancelled);
    assert!(run.report().is_none());

    for id in ["block_1", "block_2"] {
        let events = run.events.block_events(id);
        validate_block_sequence(&events).unwrap();
        match &events.last().unwrap().payload {
            EventPayload::BlockFailed { reason, .. } => assert_eq!(reason, "cancelled"),
            other => panic!("{} ended with {:?}", id, other),
        }
    }
    assert!(seen.iter().all(|e| !matches!(
        e.kind(),
        "researching_completed" | "reporting_started" | "reporting_completed"
    )));
    assert_eq!(seen.last().unwrap().kind(), "status");

    // The subscriber saw exactly the recorded history.
    let history = run.events.history();
    let seen_seqs: Vec<u64> = seen.iter().map(|e| e.seq).collect();
    let history_seqs: Vec<u64> = history.iter().map(|e| e.seq).collect();
    assert_eq!(seen_seqs, history_seqs);
}

#[tokio::test]
async fn test_reducer_rebuilds_state_from_events() {
    let tool = Arc::new(MockTool::new());
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions", "Calvin cycle"])
        .sufficient_after("Light reactions", 1);
    let pipeline = pipeline(llm, &tool);

    let run = pipeline.start_run();
    let mut request = RunRequest::new("Photosynthesis");
    request.max_iterations = Some(2);
    pipeline.execute(&run, request).await.unwrap();

    let history = run.events.history();
    let mut rebuilt = ResearchState::default();
    for event in &history {
        assert!(rebuilt.apply(event));
    }
    // Redelivery of any prefix changes nothing.
    for event in &history {
        assert!(!rebuilt.apply(event));
    }

    let live = run.snapshot();
    assert_eq!(rebuilt.research_id, live.research_id);
    assert_eq!(rebuilt.stage, Stage::Completed);
    assert_eq!(rebuilt.completed_blocks, live.completed_blocks);
    assert_eq!(rebuilt.failed_blocks, live.failed_blocks);
    assert_eq!(rebuilt.planning.sub_topics, live.planning.sub_topics);
    assert_eq!(rebuilt.reporting.word_count, live.reporting.word_count);
    assert_eq!(rebuilt.reporting.citation_count, live.reporting.citation_count);
    for (id, task) in &live.researching.tasks {
        assert_eq!(rebuilt.researching.tasks[id].status, task.status);
        assert_eq!(rebuilt.researching.tasks[id].iteration, task.iteration);
    }
}

#[tokio::test]
async fn test_late_subscriber_gets_full_replay() {
    let tool = Arc::new(MockTool::new());
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions"]).sufficient_after("Light reactions", 0);
    let pipeline = pipeline(llm, &tool);

    let run = pipeline.start_run();
    pipeline.execute(&run, RunRequest::new("Photosynthesis")).await.unwrap();

    let mut subscription = run.events.subscribe();
    let mut replayed = Vec::new();
    while let Some(event) = subscription.recv().await {
        replayed.push(event.seq);
    }
    assert_eq!(replayed.len(), run.events.history().len());
    assert_eq!(replayed.first(), Some(&1));
}

#[tokio::test]
async fn test_planning_failure_fails_the_run() {
    let tool = Arc::new(MockTool::new());
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions"]).failing_on(prompts::DECOMPOSE_SYSTEM);
    let pipeline = pipeline(llm, &tool);

    let run = pipeline.start_run();
    let result = pipeline.execute(&run, RunRequest::new("Photosynthesis")).await;

    assert!(matches!(result, Err(AppError::Planning(_))));
    assert!(matches!(run.status(), RunStatus::Failed(_)));
    assert_eq!(run.snapshot().stage, Stage::Planning);
    let last = run.events.history().pop().unwrap();
    assert!(matches!(last.payload, EventPayload::Error { fatal: true, .. }));
    assert_eq!(tool.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let tool = Arc::new(MockTool::new());
    let pipeline = pipeline(ScriptedLLM::new("x", &["y"]), &tool);

    assert!(matches!(
        pipeline.validate(&RunRequest::new("   ")),
        Err(AppError::InvalidInput(_))
    ));

    let mut request = RunRequest::new("Photosynthesis");
    request.max_iterations = Some(0);
    assert!(matches!(pipeline.validate(&request), Err(AppError::InvalidInput(_))));

    let mut request = RunRequest::new("Photosynthesis");
    request.max_concurrency = Some(0);
    assert!(matches!(pipeline.validate(&request), Err(AppError::InvalidInput(_))));

    let mut request = RunRequest::new("Photosynthesis");
    request.iteration_overrides.insert("block_1".to_string(), 0);
    assert!(matches!(pipeline.validate(&request), Err(AppError::InvalidInput(_))));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_at_run_start() {
    let tool = Arc::new(MockTool::new());
    let mut config = test_config();
    config.research.status_interval_ms = 0;
    let pipeline = ResearchPipeline::new(Arc::new(ScriptedLLM::new("x", &["y"])), tool.registry(), config);

    assert!(matches!(
        pipeline.validate(&RunRequest::new("Photosynthesis")),
        Err(AppError::Configuration(_))
    ));

    let run = pipeline.start_run();
    let result = pipeline.execute(&run, RunRequest::new("Photosynthesis")).await;
    assert!(matches!(result, Err(AppError::Configuration(_))));
    assert!(matches!(run.status(), RunStatus::Failed(_)));
    assert!(run.events.is_closed());
}

#[tokio::test]
async fn test_iteration_override_applies_to_one_block() {
    let tool = Arc::new(MockTool::new());
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions", "Calvin cycle"]);
    let pipeline = pipeline(llm, &tool);

    let run = pipeline.start_run();
    let mut request = RunRequest::new("Photosynthesis");
    request.max_iterations = Some(2);
    request.iteration_overrides.insert("block_2".to_string(), 1);
    pipeline.execute(&run, request).await.unwrap();

    let history = run.events.history();
    assert_eq!(block_completed(&history, "block_1"), Some((2, 2, true)));
    assert_eq!(block_completed(&history, "block_2"), Some((1, 1, true)));
}

#[tokio::test]
async fn test_agent_logs_reach_the_run_stream() {
    let subscriber = tracing_subscriber::Registry::default().with(EventLogLayer::default());
    let _default = tracing::subscriber::set_default(subscriber);

    let tool = Arc::new(MockTool::new().failing_on("Calvin"));
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions", "Calvin cycle"])
        .sufficient_after("Light reactions", 1);
    let pipeline = pipeline(llm, &tool);

    let run = pipeline.start_run();
    pipeline.execute(&run, RunRequest::new("Photosynthesis")).await.unwrap();

    let logs: Vec<(String, String)> = run
        .events
        .history()
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::Log { level, message, .. } => Some((level, message)),
            _ => None,
        })
        .collect();

    assert!(logs.contains(&("info".to_string(), "Research run started".to_string())));
    assert!(logs.contains(&("warn".to_string(), "Call failed, retrying".to_string())));
    assert!(logs.contains(&("error".to_string(), "Block failed".to_string())));
}
