use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use super::types::{InvalidateResponse, StreamingResponse};
use crate::state::SharedState;

pub async fn get_streaming(
    State(state): State<Arc<SharedState>>,
    Path((mal_id, episode)): Path<(i32, i32)>,
) -> Result<Json<StreamingResponse>, ApiError> {
    if mal_id <= 0 {
        return Err(ApiError::validation("MAL id must be positive"));
    }
    if episode <= 0 {
        return Err(ApiError::validation("Episode must be positive"));
    }

    let resolved = state
        .mappings
        .resolve_by_mal_id(mal_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No mapping found for MAL id {mal_id}")))?;

    let data = state.streaming.get_streaming(&resolved.mapping, episode).await;

    Ok(Json(StreamingResponse {
        success: true,
        mal_id,
        episode,
        data,
    }))
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub mal_id: i32,
    pub episode: i32,
    pub secret: String,
}

pub async fn invalidate(
    State(state): State<Arc<SharedState>>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    if request.secret != state.config.archival.salt {
        return Err(ApiError::Unauthorized("Invalid secret".to_string()));
    }

    let invalidated = state
        .streaming
        .invalidate(request.mal_id, request.episode, &request.secret)
        .await;

    Ok(Json(InvalidateResponse {
        success: true,
        invalidated,
    }))
}
