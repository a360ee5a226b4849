//! Axum router configuration with middleware.
//!
//! All REST routes are under `/api/v1/`. Middleware: CORS and request
//! tracing. No authentication layer; deployment fronts the API with its
//! own gateway.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers::{approval, workflow};
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflow lifecycle
        .route("/workflows", post(workflow::create_workflow))
        .route("/workflows", get(workflow::list_workflows))
        .route("/workflows/{id}", get(workflow::get_workflow))
        .route("/workflows/{id}/start", post(workflow::start_workflow))
        .route("/workflows/{id}/checkpoints", post(workflow::create_checkpoint))
        .route("/workflows/{id}/reconcile", post(workflow::reconcile_workflow))
        .route(
            "/workflows/{id}/rollback/complete",
            post(workflow::complete_rollback),
        )
        .route("/workflows/{id}/settle", post(workflow::settle_workflow))
        .route("/workflows/{id}/complete", post(workflow::complete_workflow))
        .route("/workflows/{id}/cancel", post(workflow::cancel_workflow))
        .route("/workflows/{id}/monitor", get(workflow::monitor_workflow))
        .route(
            "/workflows/{id}/approvals/expire",
            post(approval::expire_approvals),
        )
        // Supervisor pull API
        .route("/approvals", get(approval::list_pending))
        .route("/approvals/{request_id}", get(approval::get_request))
        .route("/approvals/{request_id}", post(approval::submit_decision))
        .route("/supervisor/stats", get(approval::supervisor_stats));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
