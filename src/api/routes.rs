use crate::AppState;
use crate::api::handlers;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/research", post(handlers::research::start_research))
        .route(
            "/research/{id}",
            get(handlers::research::get_research).delete(handlers::research::cancel_research),
        )
        .route("/research/{id}/events", get(handlers::research::research_events))
        .route("/research/{id}/report", get(handlers::research::get_report))
}

/// Full application: API under `/api` with tracing and CORS layers.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest("/api", create_router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
