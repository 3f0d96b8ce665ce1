//! API request handlers.

/// Research run handlers (start, inspect, stream, cancel).
pub mod research;

use axum::Json;
use serde_json::{Value, json};

/// Health check
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
