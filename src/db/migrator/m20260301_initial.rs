use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::ConnectionTrait;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Mapping::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Mapping::MalId)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Mapping::TitleMain).string().not_null())
                    .col(ColumnDef::new(Mapping::SlugAnimasu).string())
                    .col(ColumnDef::new(Mapping::SlugSamehadaku).string())
                    .col(ColumnDef::new(Mapping::PhashV1).string())
                    .col(ColumnDef::new(Mapping::ReleaseYear).integer())
                    .col(ColumnDef::new(Mapping::TotalEpisodes).integer())
                    .col(ColumnDef::new(Mapping::LastSync).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mapping_slug_animasu")
                    .table(Mapping::Table)
                    .col(Mapping::SlugAnimasu)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mapping_slug_samehadaku")
                    .table(Mapping::Table)
                    .col(Mapping::SlugSamehadaku)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MalMetadata::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MalMetadata::MalId)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MalMetadata::Title).string().not_null())
                    .col(ColumnDef::new(MalMetadata::TitleEnglish).string())
                    .col(ColumnDef::new(MalMetadata::TitleJapanese).string())
                    .col(ColumnDef::new(MalMetadata::Synopsis).text())
                    .col(ColumnDef::new(MalMetadata::AnimeType).string())
                    .col(ColumnDef::new(MalMetadata::Episodes).integer())
                    .col(ColumnDef::new(MalMetadata::Status).string())
                    .col(ColumnDef::new(MalMetadata::Duration).string())
                    .col(ColumnDef::new(MalMetadata::Score).double())
                    .col(ColumnDef::new(MalMetadata::Rank).integer())
                    .col(ColumnDef::new(MalMetadata::Year).integer())
                    .col(ColumnDef::new(MalMetadata::Season).string())
                    .col(ColumnDef::new(MalMetadata::Genres).string())
                    .col(ColumnDef::new(MalMetadata::Studios).string())
                    .col(ColumnDef::new(MalMetadata::ImageUrl).string())
                    .col(ColumnDef::new(MalMetadata::ImageWebpUrl).string())
                    .col(ColumnDef::new(MalMetadata::UpdatedAt).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(VideoQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VideoQueue::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(VideoQueue::MalId).integer().not_null())
                    .col(ColumnDef::new(VideoQueue::Episode).integer().not_null())
                    .col(ColumnDef::new(VideoQueue::Provider).string().not_null())
                    .col(ColumnDef::new(VideoQueue::VideoUrl).string().not_null())
                    .col(ColumnDef::new(VideoQueue::Resolution).string())
                    .col(
                        ColumnDef::new(VideoQueue::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(VideoQueue::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(VideoQueue::ErrorMessage).text())
                    .col(ColumnDef::new(VideoQueue::CreatedAt).string().not_null())
                    .col(ColumnDef::new(VideoQueue::UpdatedAt).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(VideoStore::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VideoStore::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(VideoStore::MalId).integer().not_null())
                    .col(ColumnDef::new(VideoStore::Episode).integer().not_null())
                    .col(ColumnDef::new(VideoStore::Provider).string().not_null())
                    .col(ColumnDef::new(VideoStore::Resolution).string())
                    .col(ColumnDef::new(VideoStore::FileKey).string().not_null())
                    .col(
                        ColumnDef::new(VideoStore::AccountIndex)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(VideoStore::RepoId).string().not_null())
                    .col(ColumnDef::new(VideoStore::Path).string().not_null())
                    .col(ColumnDef::new(VideoStore::DirectUrl).string().not_null())
                    .col(ColumnDef::new(VideoStore::StreamUrl).string().not_null())
                    .col(ColumnDef::new(VideoStore::CreatedAt).string().not_null())
                    .to_owned(),
            )
            .await?;

        // SQL-level uniqueness for the job key. COALESCE makes the
        // null-resolution row unique too, which a plain multi-column
        // unique index would not (NULLs never collide).
        let conn = manager.get_connection();
        conn.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_video_queue_key \
             ON video_queue (mal_id, episode, provider, COALESCE(resolution, ''))",
        )
        .await?;
        conn.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_video_store_key \
             ON video_store (mal_id, episode, provider, COALESCE(resolution, ''))",
        )
        .await?;
        conn.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_video_queue_status ON video_queue (status)",
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(VideoStore::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(VideoQueue::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MalMetadata::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Mapping::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Mapping {
    Table,
    MalId,
    TitleMain,
    SlugAnimasu,
    SlugSamehadaku,
    PhashV1,
    ReleaseYear,
    TotalEpisodes,
    LastSync,
}

#[derive(DeriveIden)]
enum MalMetadata {
    Table,
    MalId,
    Title,
    TitleEnglish,
    TitleJapanese,
    Synopsis,
    AnimeType,
    Episodes,
    Status,
    Duration,
    Score,
    Rank,
    Year,
    Season,
    Genres,
    Studios,
    ImageUrl,
    ImageWebpUrl,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum VideoQueue {
    Table,
    Id,
    MalId,
    Episode,
    Provider,
    VideoUrl,
    Resolution,
    Status,
    RetryCount,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum VideoStore {
    Table,
    Id,
    MalId,
    Episode,
    Provider,
    Resolution,
    FileKey,
    AccountIndex,
    RepoId,
    Path,
    DirectUrl,
    StreamUrl,
    CreatedAt,
}
