use axum::extract::{Query, State};
use axum::http::header::HeaderName;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

use super::error::ApiError;
use super::types::{GenreResponse, HomeResponse};
use crate::services::home::HomeService;
use crate::state::SharedState;

static X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");

pub async fn get_home(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    let started = Instant::now();
    let data = state.home.home().await;
    let duration = started.elapsed().as_secs_f64();

    let body = HomeResponse {
        success: true,
        count: data.len(),
        duration,
        data,
    };

    ([(X_RESPONSE_TIME.clone(), format!("{duration:.3}"))], Json(body))
}

#[derive(Debug, Deserialize)]
pub struct GenreQuery {
    pub genre: Option<String>,
    pub page: Option<u32>,
}

pub async fn browse_genre(
    State(state): State<Arc<SharedState>>,
    Query(query): Query<GenreQuery>,
) -> Result<Json<GenreResponse>, ApiError> {
    let genre = query
        .genre
        .ok_or_else(|| ApiError::validation("Missing required query parameter: genre"))?;
    let genre_id = HomeService::genre_id(&genre)
        .ok_or_else(|| ApiError::validation(format!("Unknown genre: {genre}")))?;
    let page = query.page.unwrap_or(1).max(1);

    let result = state
        .home
        .browse_genre(genre_id, page)
        .await
        .ok_or_else(|| ApiError::jikan_error("genre lookup failed"))?;

    Ok(Json(GenreResponse {
        success: true,
        genre_id: result.genre_id,
        page: result.page,
        has_next_page: result.has_next_page,
        count: result.items.len(),
        data: result.items,
    }))
}
