mod common;

use ares_research::research::events::{EventPayload, EventStream};
use ares_research::research::planner::TopicPlanner;
use ares_research::research::prompts;
use ares_research::research::topics::TopicRegistry;
use ares_research::research::types::BlockStatus;
use ares_research::types::AppError;
use common::mocks::{test_config, ScriptedLLM};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn planner(llm: ScriptedLLM, events: &Arc<EventStream>) -> TopicPlanner {
    TopicPlanner::new(
        Arc::new(llm),
        Arc::new(TopicRegistry::new(5)),
        Arc::clone(events),
        test_config().research,
    )
}

#[tokio::test]
async fn test_plan_seeds_blocks_in_order() {
    let events = EventStream::new("plan-1");
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions", "Calvin cycle", "Light Reactions "]);

    let (optimized, blocks) = planner(llm, &events)
        .plan("  Photosynthesis ", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(optimized, "Photosynthesis: mechanisms and significance");
    // The duplicate sub-topic is dropped after normalization.
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].id, "block_1");
    assert_eq!(blocks[1].id, "block_2");
    assert_eq!(blocks[1].sub_topic, "Calvin cycle");
    assert!(blocks.iter().all(|b| b.status == BlockStatus::Pending));

    let kinds: Vec<&str> = events.history().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            "planning_started",
            "rephrase_completed",
            "decompose_started",
            "decompose_completed",
            "queue_seeded",
            "planning_completed",
        ]
    );
}

#[tokio::test]
async fn test_rephrase_failure_keeps_original_topic() {
    let events = EventStream::new("plan-2");
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions"]).failing_on(prompts::REPHRASE_SYSTEM);

    let (optimized, blocks) = planner(llm, &events)
        .plan("Photosynthesis", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(optimized, "Photosynthesis");
    assert_eq!(blocks.len(), 1);
    let rephrased = events
        .history()
        .into_iter()
        .find_map(|e| match e.payload {
            EventPayload::RephraseCompleted { optimized_topic, .. } => Some(optimized_topic),
            _ => None,
        })
        .unwrap();
    assert_eq!(rephrased, "Photosynthesis");
}

#[tokio::test]
async fn test_decompose_failure_is_planning_error() {
    let events = EventStream::new("plan-3");
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions"]).failing_on(prompts::DECOMPOSE_SYSTEM);

    let result = planner(llm, &events)
        .plan("Photosynthesis", &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(AppError::Planning(_))));
    assert!(events.history().iter().all(|e| e.kind() != "planning_completed"));
}

#[tokio::test]
async fn test_empty_decomposition_is_planning_error() {
    let events = EventStream::new("plan-4");
    let llm = ScriptedLLM::new("Photosynthesis", &[]);

    let result = planner(llm, &events)
        .plan("Photosynthesis", &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(AppError::Planning(_))));
}

#[tokio::test]
async fn test_cancelled_before_planning() {
    let events = EventStream::new("plan-5");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let llm = ScriptedLLM::new("Photosynthesis", &["Light reactions"]);

    let result = planner(llm, &events).plan("Photosynthesis", &cancel).await;
    assert!(matches!(result, Err(AppError::Cancelled)));
}
