//! Presigned upload URL endpoint

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::pipeline::UploadUrl;
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadUrlQuery {
    pub object_name: Option<String>,
}

/// GET /api/upload-url?object_name=doc1.pdf
pub async fn upload_url(
    State(state): State<AppState>,
    Query(query): Query<UploadUrlQuery>,
) -> Result<Json<UploadUrl>> {
    let object_name = query
        .object_name
        .ok_or_else(|| Error::invalid_key("", "missing object_name"))?;

    let upload = state.pipeline().uploads.issue(&object_name).await?;
    Ok(Json(upload))
}
