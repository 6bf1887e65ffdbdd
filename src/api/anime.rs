use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::error::ApiError;
use super::types::{AnimeData, AnimeResponse, EpisodeDto, MalDto, MappingDto};
use crate::entities::mapping;
use crate::providers::ProviderKind;
use crate::services::mapping::Resolved;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct AnimeQuery {
    pub provider: Option<String>,
}

pub async fn get_by_slug(
    State(state): State<Arc<SharedState>>,
    Path(slug): Path<String>,
    Query(query): Query<AnimeQuery>,
) -> Result<Json<AnimeResponse>, ApiError> {
    let provider_name = query
        .provider
        .ok_or_else(|| ApiError::validation("Missing required query parameter: provider"))?;
    let provider = ProviderKind::parse(&provider_name)
        .ok_or_else(|| ApiError::validation(format!("Unknown provider: {provider_name}")))?;

    let resolved = state
        .mappings
        .resolve_by_slug(provider, &slug)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No mapping found for {provider}:{slug}")))?;

    build_anime_response(&state, resolved).await
}

pub async fn get_by_mal_id(
    State(state): State<Arc<SharedState>>,
    Path(mal_id): Path<i32>,
) -> Result<Json<AnimeResponse>, ApiError> {
    if mal_id <= 0 {
        return Err(ApiError::validation("MAL id must be positive"));
    }

    let resolved = state
        .mappings
        .resolve_by_mal_id(mal_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No mapping found for MAL id {mal_id}")))?;

    build_anime_response(&state, resolved).await
}

async fn build_anime_response(
    state: &SharedState,
    resolved: Resolved,
) -> Result<Json<AnimeResponse>, ApiError> {
    let mal = state
        .store
        .get_mal_metadata(resolved.mapping.mal_id)
        .await?
        .map(MalDto::from);

    let episodes = scrape_episodes(state, &resolved.mapping).await;

    Ok(Json(AnimeResponse {
        success: true,
        cached: resolved.cached,
        data: AnimeData {
            mapping: MappingDto::from(resolved.mapping),
            mal,
            episodes,
        },
    }))
}

/// Episode lists per provider, in parallel; a failed provider yields null.
async fn scrape_episodes(
    state: &SharedState,
    mapping: &mapping::Model,
) -> HashMap<String, Option<Vec<EpisodeDto>>> {
    let futures: Vec<_> = state
        .providers
        .iter()
        .map(|provider| {
            let kind = provider.kind();
            let slug = match kind {
                ProviderKind::Animasu => mapping.slug_animasu.clone(),
                ProviderKind::Samehadaku => mapping.slug_samehadaku.clone(),
            };
            let provider = provider.clone();
            async move {
                let Some(slug) = slug else {
                    return (kind, None);
                };
                match provider.episodes(&slug).await {
                    Ok(entries) => {
                        let list = entries
                            .into_iter()
                            .map(|e| EpisodeDto {
                                number: e.number,
                                title: e.title,
                                url: e.url,
                            })
                            .collect();
                        (kind, Some(list))
                    }
                    Err(e) => {
                        warn!(provider = %kind, error = %e, "episode list scrape failed");
                        (kind, None)
                    }
                }
            }
        })
        .collect();

    futures::future::join_all(futures)
        .await
        .into_iter()
        .map(|(kind, list)| (kind.as_str().to_string(), list))
        .collect()
}
