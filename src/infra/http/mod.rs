mod error;
mod handlers;
mod middleware;
mod state;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use handlers::{EnqueueResponse, RenderResponse, SERVICE_NAME};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use state::HttpState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use middleware::{log_responses, set_request_context};

/// Mount the service routes. Queue, ledger and artifact routes only exist
/// when their backing services are present in `state`.
pub fn build_router(state: HttpState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/render", post(handlers::render_card));

    if state.queue.is_some() {
        router = router
            .route("/api/v1/render-jobs", post(handlers::enqueue_render_job))
            .route("/api/v1/render-jobs/{job_id}", get(handlers::get_render_job));
    }
    if state.ledger.is_some() {
        router = router
            .route("/api/v1/exports/manifest", get(handlers::export_manifest))
            .route("/api/v1/exports/{card_id}/png", get(handlers::export_png));
    }
    if state.artifacts.is_some() {
        router = router.route("/artifacts/{*storage_id}", get(handlers::serve_artifact));
    }

    router
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
