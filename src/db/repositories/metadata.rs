use crate::entities::{mal_metadata, prelude::*};
use anyhow::Result;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

pub struct MetadataRepository {
    conn: DatabaseConnection,
}

/// Full Jikan record as persisted. Unlike mappings this is authoritative:
/// every write replaces the whole row.
#[derive(Debug, Clone)]
pub struct MalMetadataInput {
    pub mal_id: i32,
    pub title: String,
    pub title_english: Option<String>,
    pub title_japanese: Option<String>,
    pub synopsis: Option<String>,
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

impl MetadataRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, mal_id: i32) -> Result<Option<mal_metadata::Model>> {
        Ok(MalMetadata::find_by_id(mal_id).one(&self.conn).await?)
    }

    pub async fn upsert(&self, input: MalMetadataInput) -> Result<mal_metadata::Model> {
        let now = chrono::Utc::now().to_rfc3339();
        let mal_id = input.mal_id;
        let join = |items: Vec<String>| {
            if items.is_empty() {
                None
            } else {
                Some(items.join(", "))
            }
        };

        let active = mal_metadata::ActiveModel {
            mal_id: Set(input.mal_id),
            title: Set(input.title),
            title_english: Set(input.title_english),
            title_japanese: Set(input.title_japanese),
            synopsis: Set(input.synopsis),
            anime_type: Set(input.anime_type),
            episodes: Set(input.episodes),
            status: Set(input.status),
            duration: Set(input.duration),
            score: Set(input.score),
            rank: Set(input.rank),
            year: Set(input.year),
            season: Set(input.season),
            genres: Set(join(input.genres)),
            studios: Set(join(input.studios)),
            image_url: Set(input.image_url),
            image_webp_url: Set(input.image_webp_url),
            updated_at: Set(now),
        };

        let existing = MalMetadata::find_by_id(mal_id).one(&self.conn).await?;

        let model = if existing.is_some() {
            active.update(&self.conn).await?
        } else {
            active.insert(&self.conn).await?
        };

        Ok(model)
    }
}
