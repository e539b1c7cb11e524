//! Gateway router configuration.

use std::sync::Arc;

use axum::routing::put;
use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers::{self, AppState};

/// Create the gateway router: the two object routes plus HTTP tracing.
///
/// Bodies are streamed end to end, so no request size limit applies.
pub fn create_router(state: Arc<AppState>) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/files/{name}", put(handlers::upload_file).get(handlers::read_file))
        .with_state(state)
        .layer(trace_layer)
}
