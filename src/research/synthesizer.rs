//! Report Synthesizer: citations, outline, sections, assembly.
//!
//! Sections are written strictly one after another in outline order. The
//! final text has this layout:
//!
//! ```text
//! # Title
//! ## Introduction
//! ## 1. Section          (subsections as ### 1.1 ...)
//! ## Conclusion
//! ## References
//! ```
//!
//! All metrics on the [`Report`] come from [`recount`], so re-scanning the
//! text always reproduces them.

use super::agent::guarded;
use super::citations::{deduplicate, rewrite_markers, CitationRemap};
use super::events::{EventPayload, EventStream};
use super::prompts;
use super::types::{BlockStatus, OutlineSection, Report, ReportOutline, TopicBlock};
use crate::llm::{generate_json, LLMClient};
use crate::types::{AppError, Result};
use crate::utils::toml_config::{ReportingConfig, ResearchConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Metrics derived from report text and citation remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportMetrics {
    pub word_count: usize,
    pub section_count: usize,
    pub citation_count: usize,
}

fn is_numbered_section(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("## ") else {
        return false;
    };
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && rest[digits..].starts_with(". ")
}

/// Push `#` and `##` headings in model-written text down to `###`, so only
/// the report skeleton owns the top two levels.
fn demote_headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            let hashes = line.chars().take_while(|c| *c == '#').count();
            if (1..3).contains(&hashes) && line[hashes..].starts_with(' ') {
                format!("###{}", &line[hashes..])
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Recompute report metrics from the assembled text.
pub fn recount(text: &str, remap: &BTreeMap<u64, u32>) -> ReportMetrics {
    ReportMetrics {
        word_count: text.split_whitespace().count(),
        section_count: text.lines().filter(|l| is_numbered_section(l)).count(),
        citation_count: remap.values().collect::<BTreeSet<_>>().len(),
    }
}

pub struct ReportSynthesizer {
    llm: Arc<dyn LLMClient>,
    events: Arc<EventStream>,
    research: ResearchConfig,
    reporting: ReportingConfig,
}

impl ReportSynthesizer {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        events: Arc<EventStream>,
        research: ResearchConfig,
        reporting: ReportingConfig,
    ) -> Self {
        Self {
            llm,
            events,
            research,
            reporting,
        }
    }

    /// Build the report from the terminal blocks of a run.
    ///
    /// Only completed blocks contribute. An unusable outline falls back to a
    /// single "Findings" section instead of failing.
    pub async fn synthesize(
        &self,
        topic: &str,
        blocks: &[TopicBlock],
        cancel: &CancellationToken,
    ) -> Result<Report> {
        let completed: Vec<&TopicBlock> = blocks
            .iter()
            .filter(|b| b.status == BlockStatus::Completed)
            .collect();
        if completed.is_empty() {
            return Err(AppError::NoCompletedBlocks);
        }

        self.events.publish(EventPayload::ReportingStarted {
            block_count: completed.len(),
        });
        tracing::info!(
            research_id = %self.events.research_id(),
            blocks = completed.len(),
            "Reporting started"
        );

        let citations = deduplicate(blocks, self.reporting.dedup_threshold);
        self.events.publish(EventPayload::DeduplicateCompleted {
            raw_citations: citations.raw_count,
            unique_citations: citations.unique_count(),
        });

        let (mut outline, fallback) = match self.build_outline(topic, &completed, cancel).await {
            Ok(outline) => (outline, false),
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Outline generation failed, using fallback report");
                self.events.publish(EventPayload::Error {
                    message: e.to_string(),
                    fatal: false,
                    block_id: None,
                });
                (fallback_outline(topic), true)
            }
        };
        self.events.publish(EventPayload::OutlineCompleted {
            title: outline.title.clone(),
            section_count: outline.sections.len(),
            fallback,
        });

        let total = outline.sections.len();
        for index in 0..total {
            self.events.publish(EventPayload::WritingSection {
                index: index + 1,
                total,
                title: outline.sections[index].title.clone(),
            });
            let previous: Vec<String> = outline.sections[..index].iter().map(|s| s.title.clone()).collect();
            let body = self
                .write_section(topic, index + 1, &outline.sections[index], &previous, &completed, cancel)
                .await?;
            outline.sections[index].content = Some(rewrite_markers(&body, &citations.remap));
        }
        self.events.publish(EventPayload::WritingCompleted { section_count: total });

        let titles: Vec<&str> = outline.sections.iter().map(|s| s.title.as_str()).collect();
        let intro_plan = outline
            .introduction_instruction
            .clone()
            .unwrap_or_else(|| outline.introduction.clone());
        let conclusion_plan = outline
            .conclusion_instruction
            .clone()
            .unwrap_or_else(|| outline.conclusion.clone());
        let introduction = self
            .write_frame(topic, "introduction", &intro_plan, &titles, cancel)
            .await?;
        let conclusion = self
            .write_frame(topic, "conclusion", &conclusion_plan, &titles, cancel)
            .await?;

        let text = assemble(
            &outline,
            &rewrite_markers(&introduction, &citations.remap),
            &rewrite_markers(&conclusion, &citations.remap),
            &citations,
        );
        let metrics = recount(&text, &citations.remap);

        self.events.publish(EventPayload::ReportingCompleted {
            word_count: metrics.word_count,
            section_count: metrics.section_count,
            citation_count: metrics.citation_count,
        });
        tracing::info!(
            research_id = %self.events.research_id(),
            words = metrics.word_count,
            sections = metrics.section_count,
            citations = metrics.citation_count,
            "Reporting completed"
        );

        Ok(Report {
            title: outline.title.clone(),
            text,
            outline,
            citations: citations.citations,
            citation_remap: citations.remap,
            word_count: metrics.word_count,
            section_count: metrics.section_count,
            citation_count: metrics.citation_count,
            fallback,
        })
    }

    async fn build_outline(
        &self,
        topic: &str,
        blocks: &[&TopicBlock],
        cancel: &CancellationToken,
    ) -> Result<ReportOutline> {
        let findings = blocks
            .iter()
            .map(|b| {
                format!(
                    "[{}] {}\nOverview: {}\n{}",
                    b.id,
                    b.sub_topic,
                    b.overview,
                    b.notes().iter().map(|n| format!("- {}", n)).collect::<Vec<_>>().join("\n")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = prompts::outline_prompt(topic, &findings);

        let mut outline: ReportOutline = guarded(
            "outline generation",
            self.research.llm_timeout(),
            self.research.max_attempts,
            cancel,
            |_| generate_json::<ReportOutline>(self.llm.as_ref(), prompts::OUTLINE_SYSTEM, &prompt),
        )
        .await
        .map_err(|e| match e {
            AppError::Cancelled => AppError::Cancelled,
            other => AppError::Synthesis(other.to_string()),
        })?;

        outline.sections.retain(|s| !s.title.trim().is_empty());
        for section in &mut outline.sections {
            let known = section
                .block_id
                .as_ref()
                .is_some_and(|id| blocks.iter().any(|b| &b.id == id));
            if !known {
                section.block_id = None;
            }
            section.subsections.retain(|s| !s.title.trim().is_empty());
            section.content = None;
        }
        if outline.sections.is_empty() {
            return Err(AppError::Synthesis("outline has no sections".to_string()));
        }
        if outline.title.trim().is_empty() {
            outline.title = topic.to_string();
        }
        Ok(outline)
    }

    async fn write_section(
        &self,
        topic: &str,
        number: usize,
        section: &OutlineSection,
        previous: &[String],
        blocks: &[&TopicBlock],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let sources: Vec<&TopicBlock> = match &section.block_id {
            Some(id) => blocks.iter().copied().filter(|b| &b.id == id).collect(),
            None => blocks.to_vec(),
        };
        let notes = sources
            .iter()
            .flat_map(|b| b.notes())
            .map(|n| format!("- {}", n))
            .collect::<Vec<_>>()
            .join("\n");
        let previous: Vec<&str> = previous.iter().map(String::as_str).collect();

        if section.subsections.is_empty() {
            return self
                .write_part(topic, &section.title, &section.instruction, "", &notes, &previous, cancel)
                .await;
        }

        let mut parts = Vec::new();
        let overview = self
            .write_part(
                topic,
                &section.title,
                &section.instruction,
                "Write only a short lead-in paragraph; subsections follow separately.\n",
                &notes,
                &previous,
                cancel,
            )
            .await?;
        parts.push(overview);
        for (i, sub) in section.subsections.iter().enumerate() {
            let body = self
                .write_part(topic, &sub.title, &sub.instruction, "", &notes, &previous, cancel)
                .await?;
            parts.push(format!("### {}.{} {}\n\n{}", number, i + 1, sub.title, body));
        }
        Ok(parts.join("\n\n"))
    }

    /// One model call for a section body, with fallback to the raw notes.
    #[allow(clippy::too_many_arguments)]
    async fn write_part(
        &self,
        topic: &str,
        title: &str,
        instruction: &str,
        extra: &str,
        notes: &str,
        previous: &[&str],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = prompts::section_prompt(topic, title, instruction, extra, notes, previous);

        let mut body = match self.generate_section(&prompt, cancel).await {
            Ok(text) => text.trim().to_string(),
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                tracing::warn!(section = title, error = %e, "Section writing failed, using notes");
                return Ok(notes.to_string());
            }
        };

        let min_words = self.reporting.min_section_words;
        if min_words > 0 && body.split_whitespace().count() < min_words {
            tracing::debug!(section = title, "Section too short, rewriting once");
            match self.generate_section(&prompt, cancel).await {
                Ok(text) if text.split_whitespace().count() > body.split_whitespace().count() => {
                    body = text.trim().to_string();
                }
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                _ => {}
            }
        }

        if body.is_empty() {
            return Ok(notes.to_string());
        }
        Ok(body)
    }

    async fn generate_section(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        guarded(
            "section writing",
            self.research.llm_timeout(),
            self.research.max_attempts,
            cancel,
            |_| self.llm.generate_with_system(prompts::SECTION_SYSTEM, prompt),
        )
        .await
    }

    async fn write_frame(
        &self,
        topic: &str,
        part: &str,
        plan: &str,
        titles: &[&str],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = prompts::frame_prompt(topic, part, plan, titles);
        let text = guarded(
            part,
            self.research.llm_timeout(),
            self.research.max_attempts,
            cancel,
            |_| self.llm.generate_with_system(prompts::FRAME_SYSTEM, &prompt),
        )
        .await;

        match text {
            Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Err(AppError::Cancelled) => Err(AppError::Cancelled),
            _ => Ok(plan.to_string()),
        }
    }
}

fn fallback_outline(topic: &str) -> ReportOutline {
    ReportOutline {
        title: topic.to_string(),
        introduction: format!("An overview of the research on {}.", topic),
        introduction_instruction: None,
        conclusion: format!("A summary of what was found about {}.", topic),
        conclusion_instruction: None,
        sections: vec![OutlineSection {
            title: "Findings".to_string(),
            instruction: "Summarize all findings, keeping their citation markers.".to_string(),
            block_id: None,
            subsections: Vec::new(),
            content: None,
        }],
    }
}

fn assemble(outline: &ReportOutline, introduction: &str, conclusion: &str, citations: &CitationRemap) -> String {
    let mut text = format!(
        "# {}\n\n## Introduction\n\n{}\n\n",
        outline.title,
        demote_headings(introduction)
    );

    for (i, section) in outline.sections.iter().enumerate() {
        text.push_str(&format!(
            "## {}. {}\n\n{}\n\n",
            i + 1,
            section.title,
            demote_headings(section.content.as_deref().unwrap_or_default())
        ));
    }

    text.push_str(&format!(
        "## Conclusion\n\n{}\n\n## References\n\n",
        demote_headings(conclusion)
    ));
    if citations.citations.is_empty() {
        text.push_str("No sources were cited.\n");
    }
    for citation in &citations.citations {
        text.push_str(&format!(
            "[{}] {} ({}: \"{}\")\n",
            citation.number,
            citation.summary.lines().next().unwrap_or_default(),
            citation.tool_type,
            citation.query
        ));
    }
    text
}
