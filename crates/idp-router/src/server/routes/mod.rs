//! API routes for the router server

pub mod jobs;
pub mod notifications;
pub mod stats;
pub mod uploads;

use axum::{
    routing::{get, post},
    Router,
};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Landing uploads
        .route("/upload-url", get(uploads::upload_url))
        // Object-created events
        .route("/notifications", post(notifications::forward_event))
        // Classification jobs
        .route("/jobs/:id", get(jobs::describe_job))
        .route("/jobs/:id/complete", post(jobs::complete_job))
        // Pipeline counters and queue depths
        .route("/stats", get(stats::pipeline_stats))
        .route("/info", get(info))
}

async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "idp-router",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Document classification pipeline with transactional routing",
        "endpoints": {
            "GET /api/upload-url?object_name=": "Presigned PUT URL under landing/",
            "POST /api/notifications": "Forward an object-created event to the ingest queue",
            "GET /api/jobs/:id": "Describe a classification job",
            "POST /api/jobs/:id/complete": "Emit routing messages for a finished job",
            "GET /api/stats": "Stage counters, queue depths and open job records"
        }
    }))
}
