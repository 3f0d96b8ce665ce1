//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the A.R.E.S Research CLI,
//! including a one-line rendering of every research event.

use crate::research::events::{EventPayload, ResearchEvent};
use owo_colors::OwoColorize;

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

/// How an event line should be styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Stage,
    Progress,
    Success,
    Warning,
    Failure,
}

/// Render an event as a single line, or `None` for events not worth
/// printing (debug-level logs, status ticks).
pub fn describe(event: &ResearchEvent) -> Option<(Tone, String)> {
    use EventPayload::*;
    let line = match &event.payload {
        PlanningStarted { topic } => (Tone::Stage, format!("Planning: {}", topic)),
        RephraseCompleted { optimized_topic, .. } => {
            (Tone::Progress, format!("Optimized topic: {}", optimized_topic))
        }
        DecomposeStarted { .. } => (Tone::Progress, "Decomposing into sub-topics".to_string()),
        DecomposeCompleted { sub_topics } => (
            Tone::Progress,
            format!("{} sub-topics: {}", sub_topics.len(), sub_topics.join("; ")),
        ),
        QueueSeeded { block_ids } => (Tone::Progress, format!("Queued {}", block_ids.join(", "))),
        PlanningCompleted { block_count, .. } => {
            (Tone::Success, format!("Planning completed ({} blocks)", block_count))
        }
        ResearchingStarted {
            mode,
            max_concurrency,
            total_blocks,
        } => (
            Tone::Stage,
            format!(
                "Researching {} blocks ({}, concurrency {})",
                total_blocks, mode, max_concurrency
            ),
        ),
        BlockStarted {
            block_id,
            sub_topic,
            max_iterations,
        } => (
            Tone::Progress,
            format!("{} started: {} (max {} iterations)", block_id, sub_topic, max_iterations),
        ),
        CheckingSufficiency { block_id, iteration } => (
            Tone::Progress,
            format!("{} #{} checking sufficiency", block_id, iteration),
        ),
        KnowledgeSufficient { block_id, reason, .. } => {
            (Tone::Progress, format!("{} sufficient: {}", block_id, reason))
        }
        GeneratingQuery { block_id, iteration } => {
            (Tone::Progress, format!("{} #{} generating query", block_id, iteration))
        }
        ToolCalling {
            block_id,
            tool,
            query,
            attempt,
            ..
        } => {
            let retry = if *attempt > 1 {
                format!(" (attempt {})", attempt)
            } else {
                String::new()
            };
            (
                Tone::Progress,
                format!("{} {} \"{}\"{}", block_id, tool, query, retry),
            )
        }
        ToolCompleted { block_id, tool, .. } => (
            Tone::Progress,
            format!("{} {} returned", block_id, tool),
        ),
        ProcessingNotes { .. } | IterationCompleted { .. } | ParallelStatusUpdate { .. } => {
            return None;
        }
        NewTopicAdded {
            new_block_id,
            sub_topic,
            ..
        } => (
            Tone::Progress,
            format!("Discovered {}: {}", new_block_id, sub_topic),
        ),
        BlockCompleted {
            block_id,
            iterations,
            citations,
            partial,
        } => {
            let partial = if *partial { ", partial" } else { "" };
            (
                Tone::Success,
                format!(
                    "{} completed ({} iterations, {} citations{})",
                    block_id, iterations, citations, partial
                ),
            )
        }
        BlockFailed { block_id, reason } => (Tone::Failure, format!("{} failed: {}", block_id, reason)),
        ResearchingCompleted {
            total,
            completed,
            failed,
        } => (
            Tone::Success,
            format!(
                "Researching completed ({}/{} blocks, {} failed)",
                completed, total, failed
            ),
        ),
        ReportingStarted { block_count } => {
            (Tone::Stage, format!("Reporting on {} blocks", block_count))
        }
        DeduplicateCompleted {
            raw_citations,
            unique_citations,
        } => (
            Tone::Progress,
            format!("Citations: {} raw, {} unique", raw_citations, unique_citations),
        ),
        OutlineCompleted {
            title,
            section_count,
            fallback,
        } => {
            let fallback = if *fallback { " (fallback)" } else { "" };
            (
                Tone::Progress,
                format!("Outline: {} ({} sections){}", title, section_count, fallback),
            )
        }
        WritingSection { index, total, title } => (
            Tone::Progress,
            format!("Writing section {}/{}: {}", index, total, title),
        ),
        WritingCompleted { .. } => return None,
        ReportingCompleted {
            word_count,
            section_count,
            citation_count,
        } => (
            Tone::Success,
            format!(
                "Report ready: {} words, {} sections, {} citations",
                word_count, section_count, citation_count
            ),
        ),
        Log { level, message, .. } => match level.as_str() {
            "warn" => (Tone::Warning, message.clone()),
            "error" => (Tone::Failure, message.clone()),
            _ => return None,
        },
        Error { message, fatal, .. } => {
            if *fatal {
                (Tone::Failure, message.clone())
            } else {
                (Tone::Warning, message.clone())
            }
        }
        Status { message } => (Tone::Warning, message.clone()),
    };
    Some(line)
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print the A.R.E.S banner
    pub fn banner(&self) {
        if self.colored {
            println!(
                r#"
   {}
   {}
   {}
   {}
   {}
"#,
                "    _    ____  _____ ____  ".bright_cyan().bold(),
                "   / \\  |  _ \\| ____/ ___| ".bright_cyan().bold(),
                "  / _ \\ | |_) |  _| \\___ \\ ".cyan().bold(),
                " / ___ \\|  _ <| |___ ___) |".blue().bold(),
                "/_/   \\_\\_| \\_\\_____|____/ ".blue().bold(),
            );
            println!(
                "   {} {}\n",
                "A.R.E.S Research".bright_white().bold(),
                format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
            );
        } else {
            println!(
                r#"
    _    ____  _____ ____
   / \  |  _ \| ____/ ___|
  / _ \ | |_) |  _| \___ \
 / ___ \|  _ <| |___ ___) |
/_/   \_\_| \_\_____|____/

   A.R.E.S Research v{}
"#,
                env!("CARGO_PKG_VERSION")
            );
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a stage transition
    pub fn stage(&self, message: &str) {
        if self.colored {
            println!("\n  {} {}", "▶".cyan().bold(), message.bright_white().bold());
        } else {
            println!("\n  >> {}", message);
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print one research event
    pub fn event(&self, event: &ResearchEvent) {
        let Some((tone, line)) = describe(event) else {
            return;
        };
        match tone {
            Tone::Stage => self.stage(&line),
            Tone::Progress => self.info(&line),
            Tone::Success => self.success(&line),
            Tone::Warning => self.warning(&line),
            Tone::Failure => self.error(&line),
        }
    }

    /// Print completion message
    pub fn complete(&self, message: &str) {
        if self.colored {
            println!("\n  {} {}", "🚀".green(), message.bright_green().bold());
        } else {
            println!("\n  [DONE] {}", message);
        }
    }
}
