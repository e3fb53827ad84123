//! Pipeline statistics endpoint

use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::processing::PipelineSnapshot;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stages: PipelineSnapshot,
    /// Visible messages per queue
    pub queues: BTreeMap<String, usize>,
    /// Documents dispatched but not yet moved
    pub job_records: usize,
}

/// GET /api/stats
pub async fn pipeline_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let pipeline = state.pipeline();
    let names = &state.config().queues;

    let mut queues = BTreeMap::new();
    for queue in [&names.ingest, &names.output, &names.routing, &names.job_status] {
        let depth = pipeline.backends.queue.depth(queue).await?;
        queues.insert(queue.clone(), depth);
    }

    Ok(Json(StatsResponse {
        stages: pipeline.stats.snapshot(),
        queues,
        job_records: pipeline.backends.jobs.count().await?,
    }))
}
