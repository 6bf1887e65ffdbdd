use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::entities::{mal_metadata, mapping, video_queue, video_store};
use crate::providers::ProviderKind;

pub mod migrator;
pub mod repositories;

pub use repositories::archive::ArchivePayload;
pub use repositories::mapping::MappingPatch;
pub use repositories::metadata::MalMetadataInput;
pub use repositories::queue::status as queue_status;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn mapping_repo(&self) -> repositories::mapping::MappingRepository {
        repositories::mapping::MappingRepository::new(self.conn.clone())
    }

    fn metadata_repo(&self) -> repositories::metadata::MetadataRepository {
        repositories::metadata::MetadataRepository::new(self.conn.clone())
    }

    fn queue_repo(&self) -> repositories::queue::QueueRepository {
        repositories::queue::QueueRepository::new(self.conn.clone())
    }

    fn archive_repo(&self) -> repositories::archive::ArchiveRepository {
        repositories::archive::ArchiveRepository::new(self.conn.clone())
    }

    // ===== Mappings =====

    pub async fn get_mapping(&self, mal_id: i32) -> Result<Option<mapping::Model>> {
        self.mapping_repo().get(mal_id).await
    }

    pub async fn get_mapping_by_slug(
        &self,
        provider: ProviderKind,
        slug: &str,
    ) -> Result<Option<mapping::Model>> {
        self.mapping_repo().get_by_slug(provider, slug).await
    }

    pub async fn find_mapping_by_phash(
        &self,
        hash: &str,
        threshold: i32,
    ) -> Result<Option<(mapping::Model, i32)>> {
        self.mapping_repo().find_by_phash(hash, threshold).await
    }

    pub async fn upsert_mapping(&self, patch: MappingPatch) -> Result<mapping::Model> {
        self.mapping_repo().upsert(patch).await
    }

    // ===== MAL metadata =====

    pub async fn get_mal_metadata(&self, mal_id: i32) -> Result<Option<mal_metadata::Model>> {
        self.metadata_repo().get(mal_id).await
    }

    pub async fn upsert_mal_metadata(
        &self,
        input: MalMetadataInput,
    ) -> Result<mal_metadata::Model> {
        self.metadata_repo().upsert(input).await
    }

    // ===== Archival queue =====

    pub async fn enqueue_video(
        &self,
        mal_id: i32,
        episode: i32,
        provider: &str,
        video_url: &str,
        resolution: Option<&str>,
    ) -> Result<video_queue::Model> {
        self.queue_repo()
            .enqueue(mal_id, episode, provider, video_url, resolution)
            .await
    }

    pub async fn claim_pending_videos(&self, limit: u64) -> Result<Vec<video_queue::Model>> {
        self.queue_repo().claim(limit).await
    }

    pub async fn update_queue_status(
        &self,
        id: i32,
        new_status: &str,
        error: Option<&str>,
    ) -> Result<()> {
        self.queue_repo().update_status(id, new_status, error).await
    }

    pub async fn get_queue_entry(
        &self,
        mal_id: i32,
        episode: i32,
        provider: &str,
        resolution: Option<&str>,
    ) -> Result<Option<video_queue::Model>> {
        self.queue_repo()
            .get_by_key(mal_id, episode, provider, resolution)
            .await
    }

    pub async fn queue_entry_in_progress(
        &self,
        mal_id: i32,
        episode: i32,
        provider: &str,
        resolution: Option<&str>,
    ) -> Result<bool> {
        self.queue_repo()
            .in_progress_exists(mal_id, episode, provider, resolution)
            .await
    }

    pub async fn reset_stale_jobs(&self, max_age_minutes: i64) -> Result<u64> {
        self.queue_repo().reset_stale(max_age_minutes).await
    }

    pub async fn queue_counts(&self) -> Result<HashMap<String, i64>> {
        self.queue_repo().counts_by_status().await
    }

    // ===== Durable store =====

    pub async fn get_archived(
        &self,
        mal_id: i32,
        episode: i32,
        provider: &str,
        resolution: Option<&str>,
    ) -> Result<Option<video_store::Model>> {
        self.archive_repo()
            .get_by_key(mal_id, episode, provider, resolution)
            .await
    }

    pub async fn archived_count(&self) -> Result<u64> {
        self.archive_repo().count().await
    }

    pub async fn upsert_video_store(&self, payload: ArchivePayload) -> Result<video_store::Model> {
        self.archive_repo().upsert(payload).await
    }
}
