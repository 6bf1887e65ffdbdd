use serde::Serialize;
use std::collections::HashMap;

use crate::entities::{mal_metadata, mapping};
use crate::services::home::{GenreItem, HomeItem};
use crate::services::streaming::StreamingServer;

#[derive(Debug, Serialize)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HomeResponse {
    pub success: bool,
    pub count: usize,
    /// Wall-clock seconds spent building this response.
    pub duration: f64,
    pub data: Vec<HomeItem>,
}

#[derive(Debug, Serialize)]
pub struct GenreResponse {
    pub success: bool,
    pub genre_id: i32,
    pub page: u32,
    pub has_next_page: bool,
    pub count: usize,
    pub data: Vec<GenreItem>,
}

#[derive(Debug, Serialize)]
pub struct MappingDto {
    pub mal_id: i32,
    pub title_main: String,
    pub slug_animasu: Option<String>,
    pub slug_samehadaku: Option<String>,
    pub phash_v1: Option<String>,
    pub release_year: Option<i32>,
    pub total_episodes: Option<i32>,
    pub last_sync: String,
}

impl From<mapping::Model> for MappingDto {
    fn from(m: mapping::Model) -> Self {
        Self {
            mal_id: m.mal_id,
            title_main: m.title_main,
            slug_animasu: m.slug_animasu,
            slug_samehadaku: m.slug_samehadaku,
            phash_v1: m.phash_v1,
            release_year: m.release_year,
            total_episodes: m.total_episodes,
            last_sync: m.last_sync,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MalDto {
    pub mal_id: i32,
    pub title: String,
    pub title_english: Option<String>,
    pub title_japanese: Option<String>,
    pub synopsis: Option<String>,
    #[serde(rename = "type")]
    pub anime_type: Option<String>,
    pub episodes: Option<i32>,
    pub status: Option<String>,
    pub duration: Option<String>,
    pub score: Option<f64>,
    pub rank: Option<i32>,
    pub year: Option<i32>,
    pub season: Option<String>,
    pub genres: Vec<String>,
    pub studios: Vec<String>,
    pub image_url: Option<String>,
    pub image_webp_url: Option<String>,
}

impl From<mal_metadata::Model> for MalDto {
    fn from(m: mal_metadata::Model) -> Self {
        let split = |value: Option<String>| {
            value
                .map(|s| s.split(", ").map(str::to_string).collect())
                .unwrap_or_default()
        };
        Self {
            mal_id: m.mal_id,
            title: m.title,
            title_english: m.title_english,
            title_japanese: m.title_japanese,
            synopsis: m.synopsis,
            anime_type: m.anime_type,
            episodes: m.episodes,
            status: m.status,
            duration: m.duration,
            score: m.score,
            rank: m.rank,
            year: m.year,
            season: m.season,
            genres: split(m.genres),
            studios: split(m.studios),
            image_url: m.image_url,
            image_webp_url: m.image_webp_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EpisodeDto {
    pub number: i32,
    pub title: Option<String>,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct AnimeData {
    pub mapping: MappingDto,
    pub mal: Option<MalDto>,
    /// Episode lists keyed by provider; a provider that failed to scrape
    /// maps to null rather than failing the response.
    pub episodes: HashMap<String, Option<Vec<EpisodeDto>>>,
}

#[derive(Debug, Serialize)]
pub struct AnimeResponse {
    pub success: bool,
    /// Reflects mapping-cache status only.
    pub cached: bool,
    pub data: AnimeData,
}

#[derive(Debug, Serialize)]
pub struct StreamingResponse {
    pub success: bool,
    pub mal_id: i32,
    pub episode: i32,
    pub data: HashMap<String, Option<Vec<StreamingServer>>>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub success: bool,
    pub invalidated: bool,
}
