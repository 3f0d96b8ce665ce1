//! System prompts for every model call in the pipeline.
//!
//! Each structured call asks for a single JSON object; the shapes are
//! documented next to the prompt that requests them.

/// `{"topic": "..."}`
pub const REPHRASE_SYSTEM: &str = "You are a research planner. Rewrite the user's research topic \
into one precise, self-contained research question or title. Keep the user's intent and language. \
Reply with JSON only: {\"topic\": \"<optimized topic>\"}";

/// `{"sub_topics": [{"sub_topic": "...", "overview": "..."}]}`
pub const DECOMPOSE_SYSTEM: &str = "You are a research planner. Split the topic into independent \
sub-topics that can each be researched on their own without overlapping. For each give a short \
sub_topic title and a one or two sentence overview of what to find out. Reply with JSON only: \
{\"sub_topics\": [{\"sub_topic\": \"...\", \"overview\": \"...\"}]}";

/// `{"sufficient": bool, "reason": "..."}`
pub const SUFFICIENCY_SYSTEM: &str = "You are a research agent judging your own notes. Decide \
whether the notes gathered so far are enough to write a thorough, cited explanation of the \
sub-topic. Reply with JSON only: {\"sufficient\": true|false, \"reason\": \"...\"}";

/// `{"query": "...", "tool": "...", "rationale": "..."}`
pub const QUERY_SYSTEM: &str = "You are a research agent. Choose the single most useful next \
lookup to fill the gaps in your notes. Pick one tool from the list and write the query it should \
run. Do not repeat earlier queries. Reply with JSON only: \
{\"query\": \"...\", \"tool\": \"<tool name>\", \"rationale\": \"...\"}";

/// `{"note": "...", "new_topic": null | {"sub_topic": "...", "overview": "..."}}`
pub const NOTE_SYSTEM: &str = "You are a research agent integrating a tool result into your \
notes. Write a concise factual note (2-4 sentences) with what the result adds about the \
sub-topic. If the result reveals an important sub-topic that is clearly outside the current one \
and outside the overall plan, describe it in new_topic, otherwise set new_topic to null. Reply \
with JSON only: {\"note\": \"...\", \"new_topic\": null}";

/// A [`ReportOutline`](super::types::ReportOutline) as JSON.
pub const OUTLINE_SYSTEM: &str = "You are a report editor. Build the outline of a research report \
from the findings of each researched sub-topic. Give the report a title, one-line plans for the \
introduction and the conclusion, and an ordered list of sections. Each section has a title, a \
writing instruction, the block_id of the findings it draws on (or null) and optional \
subsections with title and instruction. Reply with JSON only: {\"title\": \"...\", \
\"introduction\": \"...\", \"conclusion\": \"...\", \"sections\": [{\"title\": \"...\", \
\"instruction\": \"...\", \"block_id\": \"block_1\", \"subsections\": []}]}";

/// Free text.
pub const SECTION_SYSTEM: &str = "You are a research writer. Write the body of one report section \
in Markdown, without the section heading. Use only the provided notes. Keep every citation \
marker of the form [cit:N] next to the statement it supports and never invent new markers.";

/// Free text.
pub const FRAME_SYSTEM: &str = "You are a research writer. Write the requested introduction or \
conclusion of a report in Markdown, without a heading, in one or two paragraphs. Do not add \
citation markers.";

pub fn rephrase_prompt(topic: &str) -> String {
    format!("Research topic: {}", topic)
}

pub fn decompose_prompt(topic: &str, hint: usize) -> String {
    format!(
        "Topic: {}\n\nPropose up to {} sub-topics.",
        topic, hint
    )
}

pub fn sufficiency_prompt(topic: &str, sub_topic: &str, overview: &str, notes: &[&str]) -> String {
    format!(
        "Overall topic: {}\nSub-topic: {}\nOverview: {}\n\nNotes so far:\n{}",
        topic,
        sub_topic,
        overview,
        bullet_list(notes)
    )
}

pub fn query_prompt(
    sub_topic: &str,
    overview: &str,
    notes: &[&str],
    previous_queries: &[&str],
    tools: &str,
) -> String {
    format!(
        "Sub-topic: {}\nOverview: {}\n\nNotes so far:\n{}\n\nPrevious queries:\n{}\n\nAvailable tools:\n{}",
        sub_topic,
        overview,
        bullet_list(notes),
        bullet_list(previous_queries),
        tools
    )
}

pub fn note_prompt(topic: &str, sub_topic: &str, query: &str, summary: &str, raw: &str) -> String {
    format!(
        "Overall topic: {}\nSub-topic: {}\nQuery: {}\n\nResult summary:\n{}\n\nRaw result:\n{}",
        topic, sub_topic, query, summary, raw
    )
}

pub fn outline_prompt(topic: &str, findings: &str) -> String {
    format!("Report topic: {}\n\nFindings per sub-topic:\n{}", topic, findings)
}

pub fn section_prompt(
    topic: &str,
    title: &str,
    instruction: &str,
    subsections: &str,
    notes: &str,
    previous_titles: &[&str],
) -> String {
    format!(
        "Report topic: {}\nSection: {}\nInstruction: {}\n{}\nSections already written:\n{}\n\nNotes:\n{}",
        topic,
        title,
        instruction,
        subsections,
        bullet_list(previous_titles),
        notes
    )
}

pub fn frame_prompt(topic: &str, part: &str, plan: &str, section_titles: &[&str]) -> String {
    format!(
        "Report topic: {}\nWrite the {}.\nPlan: {}\n\nSections:\n{}",
        topic,
        part,
        plan,
        bullet_list(section_titles)
    )
}

fn bullet_list(items: &[&str]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
