use crate::{
    AppState,
    research::{ResearchState, RunStatus, types::Report},
    types::{AppError, Result, RunRequest, RunStarted},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// Snapshot of one run as returned by `GET /api/research/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub research_id: String,
    pub status: RunStatus,
    pub state: ResearchState,
}

/// Start a research run in the background
pub async fn start_research(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<(StatusCode, Json<RunStarted>)> {
    state.pipeline.validate(&payload)?;

    let run = state.pipeline.start_run();
    state.runs.insert(run.clone());

    let pipeline = state.pipeline.clone();
    let runs = state.runs.clone();
    let handle = run.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.execute(&handle, payload).await {
            tracing::warn!(research_id = %handle.id, error = %e, "Research run ended with error");
        }
        runs.prune();
    });

    tracing::info!(research_id = %run.id, "Research run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(RunStarted {
            research_id: run.id.clone(),
        }),
    ))
}

/// Current state of a run
pub async fn get_research(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunSnapshot>> {
    let run = state.runs.get(&id)?;
    Ok(Json(RunSnapshot {
        research_id: run.id.clone(),
        status: run.status(),
        state: run.snapshot(),
    }))
}

/// Final report of a completed run
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Report>> {
    let run = state.runs.get(&id)?;
    run.report()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No report for research run {}", id)))
}

/// Server-sent events: full replay, then live events until the run ends
pub async fn research_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let run = state.runs.get(&id)?;
    let stream = run.events.subscribe().into_stream().map(|event| {
        let sse = Event::default()
            .event(event.kind())
            .id(event.seq.to_string())
            .json_data(&event)
            .unwrap_or_else(|e| Event::default().comment(format!("unserializable event: {}", e)));
        Ok(sse)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Send the run's cancellation signal
pub async fn cancel_research(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RunSnapshot>)> {
    let run = state.runs.get(&id)?;
    run.cancel();
    Ok((
        StatusCode::ACCEPTED,
        Json(RunSnapshot {
            research_id: run.id.clone(),
            status: run.status(),
            state: run.snapshot(),
        }),
    ))
}
