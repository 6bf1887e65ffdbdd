use sea_orm::entity::prelude::*;

/// Durable copy of an archived episode. A row here implies the matching
/// video_queue entry is `ready`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "video_store")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub mal_id: i32,
    pub episode: i32,
    pub provider: String,
    pub resolution: Option<String>,
    /// 32 lowercase hex chars derived from the shared salt and the key tuple.
    pub file_key: String,
    pub account_index: i32,
    pub repo_id: String,
    pub path: String,
    pub direct_url: String,
    pub stream_url: String,
    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
