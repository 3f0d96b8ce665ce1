//! Topic Planner: raw topic in, optimized topic and seed blocks out.

use super::agent::guarded;
use super::events::{EventPayload, EventStream};
use super::prompts;
use super::topics::TopicRegistry;
use super::types::TopicBlock;
use crate::llm::{generate_json, LLMClient};
use crate::types::{AppError, Result};
use crate::utils::toml_config::ResearchConfig;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct RephraseReply {
    topic: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubTopicSpec {
    pub sub_topic: String,
    #[serde(default)]
    pub overview: String,
}

#[derive(Debug, Deserialize)]
struct DecomposeReply {
    #[serde(default)]
    sub_topics: Vec<SubTopicSpec>,
}

pub struct TopicPlanner {
    llm: Arc<dyn LLMClient>,
    topics: Arc<TopicRegistry>,
    events: Arc<EventStream>,
    config: ResearchConfig,
}

impl TopicPlanner {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        topics: Arc<TopicRegistry>,
        events: Arc<EventStream>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            llm,
            topics,
            events,
            config,
        }
    }

    /// Plan a run.
    ///
    /// A failed rephrase falls back to the raw topic. A failed or empty
    /// decomposition is an [`AppError::Planning`].
    pub async fn plan(
        &self,
        raw_topic: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<TopicBlock>)> {
        let raw_topic = raw_topic.trim();
        if raw_topic.is_empty() {
            return Err(AppError::Planning("topic is empty".to_string()));
        }

        self.events.publish(EventPayload::PlanningStarted {
            topic: raw_topic.to_string(),
        });

        let optimized = self.rephrase(raw_topic, cancel).await?;
        self.events.publish(EventPayload::RephraseCompleted {
            original_topic: raw_topic.to_string(),
            optimized_topic: optimized.clone(),
        });

        self.events.publish(EventPayload::DecomposeStarted {
            topic: optimized.clone(),
        });
        let specs = self.decompose(&optimized, cancel).await?;

        let blocks: Vec<TopicBlock> = specs
            .iter()
            .filter_map(|spec| self.topics.seed(&spec.sub_topic, &spec.overview))
            .collect();
        if blocks.is_empty() {
            return Err(AppError::Planning(format!(
                "decomposition of '{}' produced no usable sub-topics",
                optimized
            )));
        }

        self.events.publish(EventPayload::DecomposeCompleted {
            sub_topics: blocks.iter().map(|b| b.sub_topic.clone()).collect(),
        });
        self.events.publish(EventPayload::QueueSeeded {
            block_ids: blocks.iter().map(|b| b.id.clone()).collect(),
        });
        self.events.publish(EventPayload::PlanningCompleted {
            optimized_topic: optimized.clone(),
            block_count: blocks.len(),
        });

        tracing::info!(
            research_id = %self.events.research_id(),
            topic = %optimized,
            blocks = blocks.len(),
            "Planning completed"
        );

        Ok((optimized, blocks))
    }

    async fn rephrase(&self, topic: &str, cancel: &CancellationToken) -> Result<String> {
        let prompt = prompts::rephrase_prompt(topic);
        let reply = guarded(
            "rephrase",
            self.config.llm_timeout(),
            self.config.max_attempts,
            cancel,
            |_| generate_json::<RephraseReply>(self.llm.as_ref(), prompts::REPHRASE_SYSTEM, &prompt),
        )
        .await;

        match reply {
            Ok(reply) if !reply.topic.trim().is_empty() => Ok(reply.topic.trim().to_string()),
            Ok(_) => Ok(topic.to_string()),
            Err(AppError::Cancelled) => Err(AppError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Topic rephrase failed, keeping the original topic");
                Ok(topic.to_string())
            }
        }
    }

    async fn decompose(&self, topic: &str, cancel: &CancellationToken) -> Result<Vec<SubTopicSpec>> {
        let prompt = prompts::decompose_prompt(topic, self.config.subtopic_hint);
        let reply = guarded(
            "decompose",
            self.config.llm_timeout(),
            self.config.max_attempts,
            cancel,
            |_| generate_json::<DecomposeReply>(self.llm.as_ref(), prompts::DECOMPOSE_SYSTEM, &prompt),
        )
        .await;

        match reply {
            Ok(reply) => Ok(reply.sub_topics),
            Err(AppError::Cancelled) => Err(AppError::Cancelled),
            Err(e) => Err(AppError::Planning(format!("decomposition failed: {}", e))),
        }
    }
}
