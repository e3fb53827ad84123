//! Classification job endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::Result;
use crate::providers::JobDescription;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub job_id: String,
    pub routing_messages: usize,
}

/// GET /api/jobs/:id
pub async fn describe_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobDescription>> {
    let description = state.pipeline().backends.engine.describe_job(&job_id).await?;
    Ok(Json(description))
}

/// POST /api/jobs/:id/complete - emit routing messages for a finished job
pub async fn complete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CompletionResponse>> {
    let routing_messages = state.pipeline().tracker.on_completion(&job_id).await?;
    Ok(Json(CompletionResponse {
        job_id,
        routing_messages,
    }))
}
