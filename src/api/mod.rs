//! HTTP API Handlers and Routes
//!
//! REST + SSE surface for research runs, built on the Axum web framework.
//!
//! # API Endpoints
//!
//! ## Research (`/api/research`)
//! - `POST /api/research` - Start a run, returns its `research_id`
//! - `GET /api/research/{id}` - Run status and `ResearchState` snapshot
//! - `GET /api/research/{id}/events` - Server-sent events (replay, then live)
//! - `GET /api/research/{id}/report` - Final report once completed
//! - `DELETE /api/research/{id}` - Cancel the run
//!
//! ## Health (`/api/health`)
//! - `GET /api/health` - Health check endpoint

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;

use crate::research::ResearchRun;
use crate::types::{AppError, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

#[derive(Default)]
struct Runs {
    by_id: HashMap<String, ResearchRun>,
    /// Ids in insertion order, oldest first.
    order: VecDeque<String>,
}

/// Runs known to this server process, by id.
///
/// Running runs are always kept. Once more than `retention` runs have
/// finished, the oldest finished ones are dropped together with their
/// event history and report.
pub struct RunRegistry {
    runs: RwLock<Runs>,
    retention: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(crate::utils::toml_config::ServerConfig::default().retained_runs)
    }
}

impl RunRegistry {
    pub fn new(retention: usize) -> Self {
        Self {
            runs: RwLock::new(Runs::default()),
            retention,
        }
    }

    pub fn insert(&self, run: ResearchRun) {
        {
            let mut runs = self.runs.write();
            runs.order.push_back(run.id.clone());
            runs.by_id.insert(run.id.clone(), run);
        }
        self.prune();
    }

    pub fn get(&self, id: &str) -> Result<ResearchRun> {
        self.runs
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Research run {} not found", id)))
    }

    /// Drop the oldest finished runs beyond the retention limit.
    ///
    /// Returns the ids that were evicted.
    pub fn prune(&self) -> Vec<String> {
        let mut runs = self.runs.write();
        let finished: Vec<String> = runs
            .order
            .iter()
            .filter(|id| runs.by_id.get(*id).is_some_and(|r| r.status().is_finished()))
            .cloned()
            .collect();
        let excess = finished.len().saturating_sub(self.retention);
        let evicted: Vec<String> = finished.into_iter().take(excess).collect();

        for id in &evicted {
            runs.by_id.remove(id);
        }
        runs.order.retain(|id| !evicted.contains(id));
        if !evicted.is_empty() {
            tracing::debug!(
                evicted = evicted.len(),
                retained = runs.by_id.len(),
                "Pruned finished research runs"
            );
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.runs.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().by_id.is_empty()
    }
}
