//! Citation ids and cross-block deduplication.

use super::types::{BlockStatus, Citation, TopicBlock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Run-wide citation id allocator.
///
/// Ids start at 1 and are handed out with a single `fetch_add`, so blocks
/// minting traces concurrently never collide or skip.
#[derive(Debug)]
pub struct CitationAllocator {
    next: AtomicU64,
}

impl Default for CitationAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CitationAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst) - 1
    }
}

/// Result of deduplicating every trace of the completed blocks.
#[derive(Debug, Clone, Default)]
pub struct CitationRemap {
    /// Every minted citation id mapped to its final 1-based number.
    pub remap: BTreeMap<u64, u32>,
    /// One entry per distinct final number, in number order.
    pub citations: Vec<Citation>,
    /// Trace count before deduplication.
    pub raw_count: usize,
}

impl CitationRemap {
    pub fn number_for(&self, citation_id: u64) -> Option<u32> {
        self.remap.get(&citation_id).copied()
    }

    pub fn unique_count(&self) -> usize {
        self.citations.len()
    }
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard overlap of the lower-cased alphanumeric token sets.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}

/// Collapse near-duplicate tool results across `blocks`.
///
/// Only completed blocks contribute. Traces are visited in citation-id
/// order; a trace whose `query + summary` is at least `threshold` similar
/// to an earlier kept trace reuses that trace's final number.
pub fn deduplicate(blocks: &[TopicBlock], threshold: f64) -> CitationRemap {
    let mut traces: Vec<(&TopicBlock, &super::types::ToolTrace)> = blocks
        .iter()
        .filter(|b| b.status == BlockStatus::Completed)
        .flat_map(|b| b.tool_traces.iter().map(move |t| (b, t)))
        .collect();
    traces.sort_by_key(|(_, t)| t.citation_id);

    let mut result = CitationRemap {
        raw_count: traces.len(),
        ..Default::default()
    };
    let mut kept: Vec<(String, u32)> = Vec::new();

    for (block, trace) in traces {
        let key = format!("{} {}", trace.query, trace.summary);
        let existing = kept
            .iter()
            .find(|(text, _)| jaccard(text, &key) >= threshold)
            .map(|(_, number)| *number);

        let number = match existing {
            Some(number) => number,
            None => {
                let number = kept.len() as u32 + 1;
                kept.push((key, number));
                result.citations.push(Citation {
                    number,
                    citation_id: trace.citation_id,
                    block_id: block.id.clone(),
                    tool_type: trace.tool_type.clone(),
                    query: trace.query.clone(),
                    summary: trace.summary.clone(),
                });
                number
            }
        };
        result.remap.insert(trace.citation_id, number);
    }

    result
}

/// Rewrite `[cit:N]` markers to their final `[n]` numbers.
///
/// Markers with no entry in `remap` are dropped, as are their leading spaces.
pub fn rewrite_markers(text: &str, remap: &BTreeMap<u64, u32>) -> String {
    const OPEN: &str = "[cit:";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let close = after.find(']');
        let id = close.and_then(|end| after[..end].trim().parse::<u64>().ok());

        match (close, id) {
            (Some(end), Some(id)) => {
                let before = &rest[..start];
                match remap.get(&id) {
                    Some(number) => {
                        out.push_str(before);
                        out.push_str(&format!("[{}]", number));
                    }
                    None => out.push_str(before.trim_end_matches(' ')),
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str(&rest[..start + OPEN.len()]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Distinct final citation numbers referenced as `[n]` in `text`.
pub fn referenced_numbers(text: &str) -> BTreeSet<u32> {
    let mut numbers = BTreeSet::new();
    let mut rest = text;
    while let Some(start) = rest.find('[') {
        let after = &rest[start + 1..];
        if let Some(end) = after.find(']') {
            if let Ok(n) = after[..end].parse::<u32>() {
                numbers.insert(n);
            }
        }
        rest = after;
    }
    numbers
}
