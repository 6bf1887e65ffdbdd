use crate::entities::{mapping, prelude::*};
use crate::matching::phash::hamming;
use crate::providers::ProviderKind;
use anyhow::Result;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

pub struct MappingRepository {
    conn: DatabaseConnection,
}

/// Field-wise patch for the coalescing upsert: `Some` overwrites, `None`
/// preserves whatever the row already holds.
#[derive(Debug, Clone, Default)]
pub struct MappingPatch {
    pub mal_id: i32,
    pub title_main: Option<String>,
    pub slug_animasu: Option<String>,
    pub slug_samehadaku: Option<String>,
    pub phash_v1: Option<String>,
    pub release_year: Option<i32>,
    pub total_episodes: Option<i32>,
}

impl MappingRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, mal_id: i32) -> Result<Option<mapping::Model>> {
        Ok(Mapping::find_by_id(mal_id).one(&self.conn).await?)
    }

    pub async fn get_by_slug(
        &self,
        provider: ProviderKind,
        slug: &str,
    ) -> Result<Option<mapping::Model>> {
        let column = match provider {
            ProviderKind::Animasu => mapping::Column::SlugAnimasu,
            ProviderKind::Samehadaku => mapping::Column::SlugSamehadaku,
        };

        Ok(Mapping::find()
            .filter(column.eq(slug))
            .one(&self.conn)
            .await?)
    }

    /// Nearest-pHash lookup: one round trip for the candidate set, nearest
    /// row selected under `threshold`. Callers re-verify the distance before
    /// trusting the row.
    pub async fn find_by_phash(
        &self,
        hash: &str,
        threshold: i32,
    ) -> Result<Option<(mapping::Model, i32)>> {
        let rows = Mapping::find()
            .filter(mapping::Column::PhashV1.is_not_null())
            .all(&self.conn)
            .await?;

        let mut best: Option<(mapping::Model, i32)> = None;
        for row in rows {
            let Some(ref stored) = row.phash_v1 else {
                continue;
            };
            let distance = hamming(hash, stored);
            if distance < 0 || distance >= threshold {
                continue;
            }
            if best.as_ref().is_none_or(|(_, d)| distance < *d) {
                best = Some((row, distance));
            }
        }

        Ok(best)
    }

    /// Coalescing upsert keyed by `mal_id`. Supplied fields overwrite,
    /// missing fields preserve existing values, `last_sync` always advances.
    pub async fn upsert(&self, patch: MappingPatch) -> Result<mapping::Model> {
        let now = chrono::Utc::now().to_rfc3339();

        let existing = Mapping::find_by_id(patch.mal_id).one(&self.conn).await?;

        let model = match existing {
            Some(current) => {
                let mut active: mapping::ActiveModel = current.into();
                if let Some(title) = patch.title_main {
                    active.title_main = Set(title);
                }
                if let Some(slug) = patch.slug_animasu {
                    active.slug_animasu = Set(Some(slug));
                }
                if let Some(slug) = patch.slug_samehadaku {
                    active.slug_samehadaku = Set(Some(slug));
                }
                if let Some(hash) = patch.phash_v1 {
                    active.phash_v1 = Set(Some(hash));
                }
                if let Some(year) = patch.release_year {
                    active.release_year = Set(Some(year));
                }
                if let Some(total) = patch.total_episodes {
                    active.total_episodes = Set(Some(total));
                }
                active.last_sync = Set(now);
                active.update(&self.conn).await?
            }
            None => {
                let active = mapping::ActiveModel {
                    mal_id: Set(patch.mal_id),
                    title_main: Set(patch.title_main.unwrap_or_default()),
                    slug_animasu: Set(patch.slug_animasu),
                    slug_samehadaku: Set(patch.slug_samehadaku),
                    phash_v1: Set(patch.phash_v1),
                    release_year: Set(patch.release_year),
                    total_episodes: Set(patch.total_episodes),
                    last_sync: Set(now),
                };
                active.insert(&self.conn).await?
            }
        };

        Ok(model)
    }
}
