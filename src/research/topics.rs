//! Block id allocation and sub-topic bookkeeping for one run.

use super::types::TopicBlock;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out `block_N` ids and rejects duplicate sub-topics.
///
/// Shared between the planner (seeding) and every in-flight agent
/// (discovery). Discovered blocks are capped per run.
#[derive(Debug)]
pub struct TopicRegistry {
    next_id: AtomicU64,
    seen: Mutex<HashSet<String>>,
    discovered: Mutex<usize>,
    max_discovered: usize,
}

/// Lower-cased words joined by single spaces, punctuation dropped.
pub fn normalize(sub_topic: &str) -> String {
    sub_topic
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

impl TopicRegistry {
    pub fn new(max_discovered: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            seen: Mutex::new(HashSet::new()),
            discovered: Mutex::new(0),
            max_discovered,
        }
    }

    fn mint(&self, sub_topic: &str, overview: &str) -> Option<TopicBlock> {
        let key = normalize(sub_topic);
        if key.is_empty() || !self.seen.lock().insert(key) {
            return None;
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Some(TopicBlock::new(format!("block_{}", n), sub_topic.trim(), overview.trim()))
    }

    /// Create a planner-seeded block. `None` for empty or duplicate text.
    pub fn seed(&self, sub_topic: &str, overview: &str) -> Option<TopicBlock> {
        self.mint(sub_topic, overview)
    }

    /// Create a block discovered mid-research, subject to the run cap.
    pub fn discover(&self, sub_topic: &str, overview: &str) -> Option<TopicBlock> {
        let mut discovered = self.discovered.lock();
        if *discovered >= self.max_discovered {
            return None;
        }
        let block = self.mint(sub_topic, overview)?;
        *discovered += 1;
        Some(block)
    }

    pub fn discovered_count(&self) -> usize {
        *self.discovered.lock()
    }
}
