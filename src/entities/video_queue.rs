use sea_orm::entity::prelude::*;

/// One archival job per (mal_id, episode, provider, resolution) tuple.
/// Status alphabet: pending -> downloading -> uploading -> ready, with a
/// lateral edge to failed from either in-flight state.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "video_queue")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub mal_id: i32,
    pub episode: i32,
    pub provider: String,
    pub video_url: String,
    pub resolution: Option<String>,
    pub status: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
