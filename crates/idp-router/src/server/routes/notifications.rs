//! Object-created event intake

use axum::{extract::State, Json};

use crate::error::Result;
use crate::pipeline::ForwardReport;
use crate::server::state::AppState;

/// POST /api/notifications - body is the raw storage event
pub async fn forward_event(State(state): State<AppState>, body: String) -> Result<Json<ForwardReport>> {
    let report = state.pipeline().forwarder.forward(&body).await?;
    tracing::info!(
        "Event forwarded: {} queued, {} folders ignored, {} failed",
        report.forwarded,
        report.ignored_folders,
        report.failed
    );
    Ok(Json(report))
}
