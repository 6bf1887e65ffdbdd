use crate::entities::{prelude::*, video_queue};
use anyhow::Result;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QuerySelect, Set, Statement, Value,
};
use std::collections::HashMap;

/// Queue status alphabet. Stored as plain strings so multiple processes in
/// different languages can share the table.
pub mod status {
    pub const PENDING: &str = "pending";
    pub const DOWNLOADING: &str = "downloading";
    pub const UPLOADING: &str = "uploading";
    pub const READY: &str = "ready";
    pub const FAILED: &str = "failed";
}

pub struct QueueRepository {
    conn: DatabaseConnection,
}

fn resolution_filter(
    resolution: Option<&str>,
) -> sea_orm::sea_query::SimpleExpr {
    match resolution {
        Some(res) => video_queue::Column::Resolution.eq(res),
        None => video_queue::Column::Resolution.is_null(),
    }
}

impl QueueRepository {
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
    ) -> Result<Option<video_queue::Model>> {
        Ok(VideoQueue::find()
            .filter(video_queue::Column::MalId.eq(mal_id))
            .filter(video_queue::Column::Episode.eq(episode))
            .filter(video_queue::Column::Provider.eq(provider))
            .filter(resolution_filter(resolution))
            .one(&self.conn)
            .await?)
    }

    /// Insert-or-update on the unique job key. `ready` rows are left alone;
    /// `failed` rows are revived with the new URL; anything else just gets
    /// its `updated_at` refreshed.
    pub async fn enqueue(
        &self,
        mal_id: i32,
        episode: i32,
        provider: &str,
        video_url: &str,
        resolution: Option<&str>,
    ) -> Result<video_queue::Model> {
        let now = chrono::Utc::now().to_rfc3339();

        match self.get_by_key(mal_id, episode, provider, resolution).await? {
            Some(existing) if existing.status == status::READY => Ok(existing),
            Some(existing) if existing.status == status::FAILED => {
                let mut active: video_queue::ActiveModel = existing.into();
                active.status = Set(status::PENDING.to_string());
                active.video_url = Set(video_url.to_string());
                active.updated_at = Set(now);
                Ok(active.update(&self.conn).await?)
            }
            Some(existing) => {
                let mut active: video_queue::ActiveModel = existing.into();
                active.updated_at = Set(now);
                Ok(active.update(&self.conn).await?)
            }
            None => {
                let active = video_queue::ActiveModel {
                    mal_id: Set(mal_id),
                    episode: Set(episode),
                    provider: Set(provider.to_string()),
                    video_url: Set(video_url.to_string()),
                    resolution: Set(resolution.map(str::to_string)),
                    status: Set(status::PENDING.to_string()),
                    retry_count: Set(0),
                    error_message: Set(None),
                    created_at: Set(now.clone()),
                    updated_at: Set(now),
                    ..Default::default()
                };
                Ok(active.insert(&self.conn).await?)
            }
        }
    }

    /// Atomically claim up to `limit` pending jobs, flipping them to
    /// `downloading` in the same statement. Concurrent claimers can never
    /// receive overlapping rows: the UPDATE is a single writer-serialised
    /// statement and only matches rows still `pending`.
    pub async fn claim(&self, limit: u64) -> Result<Vec<video_queue::Model>> {
        let backend = self.conn.get_database_backend();
        let now = chrono::Utc::now().to_rfc3339();

        let rows = VideoQueue::find()
            .from_raw_sql(Statement::from_sql_and_values(
                backend,
                "UPDATE video_queue SET status = ?, updated_at = ? \
                 WHERE status = ? AND id IN \
                   (SELECT id FROM video_queue WHERE status = ? ORDER BY id LIMIT ?) \
                 RETURNING *",
                [
                    Value::from(status::DOWNLOADING),
                    Value::from(now),
                    Value::from(status::PENDING),
                    Value::from(status::PENDING),
                    Value::from(limit),
                ],
            ))
            .all(&self.conn)
            .await?;

        Ok(rows)
    }

    /// On `failed`, bump `retry_count` and keep the error. Other transitions
    /// store whatever error text is supplied (usually none).
    pub async fn update_status(
        &self,
        id: i32,
        new_status: &str,
        error: Option<&str>,
    ) -> Result<()> {
        let Some(existing) = VideoQueue::find_by_id(id).one(&self.conn).await? else {
            return Ok(());
        };

        let retry_count = existing.retry_count;
        let mut active: video_queue::ActiveModel = existing.into();
        active.status = Set(new_status.to_string());
        active.error_message = Set(error.map(str::to_string));
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        if new_status == status::FAILED {
            active.retry_count = Set(retry_count + 1);
        }
        active.update(&self.conn).await?;

        Ok(())
    }

    /// True when an entry for the key is anywhere in the pipeline
    /// (pending, downloading, uploading or ready).
    pub async fn in_progress_exists(
        &self,
        mal_id: i32,
        episode: i32,
        provider: &str,
        resolution: Option<&str>,
    ) -> Result<bool> {
        let count = VideoQueue::find()
            .filter(video_queue::Column::MalId.eq(mal_id))
            .filter(video_queue::Column::Episode.eq(episode))
            .filter(video_queue::Column::Provider.eq(provider))
            .filter(resolution_filter(resolution))
            .filter(video_queue::Column::Status.is_in([
                status::PENDING,
                status::DOWNLOADING,
                status::UPLOADING,
                status::READY,
            ]))
            .count(&self.conn)
            .await?;

        Ok(count > 0)
    }

    /// Revive jobs left `downloading`/`uploading` by a crashed worker.
    /// Fresh rows (under `max_age_minutes`) may be legitimately in flight
    /// and are left alone.
    pub async fn reset_stale(&self, max_age_minutes: i64) -> Result<u64> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::minutes(max_age_minutes)).to_rfc3339();

        let stale = VideoQueue::find()
            .filter(
                video_queue::Column::Status.is_in([status::DOWNLOADING, status::UPLOADING]),
            )
            .filter(video_queue::Column::UpdatedAt.lt(&cutoff))
            .all(&self.conn)
            .await?;

        let mut reset = 0u64;
        for row in stale {
            let mut active: video_queue::ActiveModel = row.into();
            active.status = Set(status::PENDING.to_string());
            active.error_message = Set(None);
            active.updated_at = Set(chrono::Utc::now().to_rfc3339());
            active.update(&self.conn).await?;
            reset += 1;
        }

        Ok(reset)
    }

    pub async fn counts_by_status(&self) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = VideoQueue::find()
            .select_only()
            .column(video_queue::Column::Status)
            .column_as(video_queue::Column::Id.count(), "count")
            .group_by(video_queue::Column::Status)
            .into_tuple()
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().collect())
    }
}
