use sea_orm::entity::prelude::*;

/// Rich Jikan metadata cached per MAL id. Authoritative: later writes
/// overwrite earlier ones wholesale.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "mal_metadata")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
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
    /// Comma-separated genre names.
    pub genres: Option<String>,
    /// Comma-separated studio names.
    pub studios: Option<String>,
    pub image_url: Option<String>,
    pub image_webp_url: Option<String>,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
