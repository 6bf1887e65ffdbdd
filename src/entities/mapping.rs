use sea_orm::entity::prelude::*;

/// Identity record tying one MAL id to at most one slug per provider.
/// `phash_v1` is null or exactly 64 lowercase hex chars.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "mapping")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub mal_id: i32,
    pub title_main: String,
    pub slug_animasu: Option<String>,
    pub slug_samehadaku: Option<String>,
    pub phash_v1: Option<String>,
    pub release_year: Option<i32>,
    pub total_episodes: Option<i32>,
    pub last_sync: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
