use weaboo::db::{ArchivePayload, Store, queue_status};

async fn memory_store() -> Store {
    Store::with_pool_options("sqlite::memory:", 1, 1)
        .await
        .expect("Failed to create in-memory store")
}

#[tokio::test]
async fn test_enqueue_is_idempotent() {
    let store = memory_store().await;

    let first = store
        .enqueue_video(55825, 1, "animasu", "https://a/", Some("720p"))
        .await
        .unwrap();
    let second = store
        .enqueue_video(55825, 1, "animasu", "https://a/", Some("720p"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.status, queue_status::PENDING);

    let counts = store.queue_counts().await.unwrap();
    assert_eq!(counts.get(queue_status::PENDING), Some(&1));
}

#[tokio::test]
async fn test_enqueue_revives_failed_with_new_url() {
    let store = memory_store().await;

    let entry = store
        .enqueue_video(55825, 1, "animasu", "https://a/", Some("720p"))
        .await
        .unwrap();

    store
        .update_queue_status(entry.id, queue_status::FAILED, Some("err"))
        .await
        .unwrap();

    let revived = store
        .enqueue_video(55825, 1, "animasu", "https://b/", Some("720p"))
        .await
        .unwrap();

    assert_eq!(revived.id, entry.id);
    assert_eq!(revived.status, queue_status::PENDING);
    assert_eq!(revived.video_url, "https://b/");
    assert_eq!(revived.retry_count, 1);
}

#[tokio::test]
async fn test_enqueue_after_ready_is_noop() {
    let store = memory_store().await;

    let entry = store
        .enqueue_video(55825, 1, "animasu", "https://a/", Some("720p"))
        .await
        .unwrap();

    store
        .upsert_video_store(ArchivePayload {
            mal_id: 55825,
            episode: 1,
            provider: "animasu".to_string(),
            resolution: Some("720p".to_string()),
            file_key: "ab".repeat(16),
            account_index: 1,
            repo_id: "user/weaboo-storage".to_string(),
            path: "weaboo-55825/55825/ep1/key.mp4".to_string(),
            direct_url: "https://huggingface.co/datasets/user/weaboo-storage/resolve/main/f.mp4"
                .to_string(),
            stream_url: "http://localhost:7862/proxy?url=enc".to_string(),
        })
        .await
        .unwrap();

    let after = store
        .enqueue_video(55825, 1, "animasu", "https://c/", Some("720p"))
        .await
        .unwrap();

    assert_eq!(after.id, entry.id);
    assert_eq!(after.status, queue_status::READY);
    assert_eq!(after.video_url, "https://a/");
}

#[tokio::test]
async fn test_null_resolution_is_its_own_key() {
    let store = memory_store().await;

    let with_res = store
        .enqueue_video(55825, 1, "animasu", "https://a/", Some("720p"))
        .await
        .unwrap();
    let without_res = store
        .enqueue_video(55825, 1, "animasu", "https://a/", None)
        .await
        .unwrap();

    assert_ne!(with_res.id, without_res.id);

    let again = store
        .enqueue_video(55825, 1, "animasu", "https://a/", None)
        .await
        .unwrap();
    assert_eq!(again.id, without_res.id);
}

#[tokio::test]
async fn test_claim_never_returns_overlapping_entries() {
    let store = memory_store().await;

    for episode in 1..=5 {
        store
            .enqueue_video(55825, episode, "animasu", "https://a/", Some("720p"))
            .await
            .unwrap();
    }

    let first = store.claim_pending_videos(2).await.unwrap();
    let second = store.claim_pending_videos(2).await.unwrap();
    let third = store.claim_pending_videos(2).await.unwrap();
    let fourth = store.claim_pending_videos(2).await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert_eq!(third.len(), 1);
    assert!(fourth.is_empty());

    let mut ids: Vec<i32> = first
        .iter()
        .chain(second.iter())
        .chain(third.iter())
        .map(|j| j.id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 5);

    for job in first.iter().chain(second.iter()).chain(third.iter()) {
        assert_eq!(job.status, queue_status::DOWNLOADING);
    }
}

#[tokio::test]
async fn test_upsert_store_promotes_queue_to_ready() {
    let store = memory_store().await;

    let entry = store
        .enqueue_video(55825, 2, "samehadaku", "https://a/", None)
        .await
        .unwrap();

    store
        .upsert_video_store(ArchivePayload {
            mal_id: 55825,
            episode: 2,
            provider: "samehadaku".to_string(),
            resolution: None,
            file_key: "cd".repeat(16),
            account_index: 1,
            repo_id: "user/weaboo-storage".to_string(),
            path: "weaboo-55825/55825/ep2/key.mp4".to_string(),
            direct_url: "https://huggingface.co/datasets/user/weaboo-storage/resolve/main/g.mp4"
                .to_string(),
            stream_url: "http://localhost:7862/proxy?url=enc".to_string(),
        })
        .await
        .unwrap();

    let row = store
        .get_queue_entry(55825, 2, "samehadaku", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.id, entry.id);
    assert_eq!(row.status, queue_status::READY);

    let archived = store
        .get_archived(55825, 2, "samehadaku", None)
        .await
        .unwrap();
    assert!(archived.is_some());
}

#[tokio::test]
async fn test_reset_stale_only_touches_old_inflight_rows() {
    let store = memory_store().await;

    let entry = store
        .enqueue_video(55825, 1, "animasu", "https://a/", None)
        .await
        .unwrap();
    store
        .update_queue_status(entry.id, queue_status::DOWNLOADING, None)
        .await
        .unwrap();

    // Freshly updated row is under the age threshold and must survive.
    let reset = store.reset_stale_jobs(120).await.unwrap();
    assert_eq!(reset, 0);

    // Age threshold in the past relative to any timestamp: everything
    // in-flight counts as stale.
    let reset = store.reset_stale_jobs(-1).await.unwrap();
    assert_eq!(reset, 1);

    let row = store
        .get_queue_entry(55825, 1, "animasu", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, queue_status::PENDING);
}
