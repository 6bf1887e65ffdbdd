use crate::db::repositories::queue::status;
use crate::entities::{prelude::*, video_queue, video_store};
use anyhow::Result;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};

pub struct ArchiveRepository {
    conn: DatabaseConnection,
}

/// Everything the worker knows about a completed upload.
#[derive(Debug, Clone)]
pub struct ArchivePayload {
    pub mal_id: i32,
    pub episode: i32,
    pub provider: String,
    pub resolution: Option<String>,
    pub file_key: String,
    pub account_index: i32,
    pub repo_id: String,
    pub path: String,
    pub direct_url: String,
    pub stream_url: String,
}

fn resolution_filter(resolution: Option<&str>) -> sea_orm::sea_query::SimpleExpr {
    match resolution {
        Some(res) => video_store::Column::Resolution.eq(res),
        None => video_store::Column::Resolution.is_null(),
    }
}

impl ArchiveRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get_by_key(
        &self,
        mal_id: i32,
        episode: i32,
        provider: &str,
        resolution: Option<&str>,
    ) -> Result<Option<video_store::Model>> {
        Ok(VideoStore::find()
            .filter(video_store::Column::MalId.eq(mal_id))
            .filter(video_store::Column::Episode.eq(episode))
            .filter(video_store::Column::Provider.eq(provider))
            .filter(resolution_filter(resolution))
            .one(&self.conn)
            .await?)
    }

    pub async fn count(&self) -> Result<u64> {
        Ok(VideoStore::find().count(&self.conn).await?)
    }

    /// Insert-or-replace the durable entry and promote the matching queue
    /// row to `ready` in the same transaction, so a store row can never
    /// exist alongside a non-ready queue entry.
    pub async fn upsert(&self, payload: ArchivePayload) -> Result<video_store::Model> {
        let txn = self.conn.begin().await?;
        let now = chrono::Utc::now().to_rfc3339();

        let existing = VideoStore::find()
            .filter(video_store::Column::MalId.eq(payload.mal_id))
            .filter(video_store::Column::Episode.eq(payload.episode))
            .filter(video_store::Column::Provider.eq(&payload.provider))
            .filter(resolution_filter(payload.resolution.as_deref()))
            .one(&txn)
            .await?;

        let mut active = video_store::ActiveModel {
            mal_id: Set(payload.mal_id),
            episode: Set(payload.episode),
            provider: Set(payload.provider.clone()),
            resolution: Set(payload.resolution.clone()),
            file_key: Set(payload.file_key),
            account_index: Set(payload.account_index),
            repo_id: Set(payload.repo_id),
            path: Set(payload.path),
            direct_url: Set(payload.direct_url),
            stream_url: Set(payload.stream_url),
            created_at: Set(now.clone()),
            ..Default::default()
        };

        let model = if let Some(current) = existing {
            active.id = Set(current.id);
            active.created_at = Set(current.created_at);
            active.update(&txn).await?
        } else {
            active.insert(&txn).await?
        };

        let queue_row = VideoQueue::find()
            .filter(video_queue::Column::MalId.eq(payload.mal_id))
            .filter(video_queue::Column::Episode.eq(payload.episode))
            .filter(video_queue::Column::Provider.eq(&payload.provider))
            .filter(match payload.resolution.as_deref() {
                Some(res) => video_queue::Column::Resolution.eq(res),
                None => video_queue::Column::Resolution.is_null(),
            })
            .one(&txn)
            .await?;

        if let Some(row) = queue_row {
            let mut queue_active: video_queue::ActiveModel = row.into();
            queue_active.status = Set(status::READY.to_string());
            queue_active.error_message = Set(None);
            queue_active.updated_at = Set(now);
            queue_active.update(&txn).await?;
        }

        txn.commit().await?;
        Ok(model)
    }
}
