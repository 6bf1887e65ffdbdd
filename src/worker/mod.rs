//! Archival worker: drains the video queue into durable storage.
//!
//! Two triggers run concurrently: a 10-second poller claiming batches, and
//! the webhook for realtime wake-ups. A counting semaphore bounds jobs in
//! flight; an in-process key set keeps the two triggers from racing on the
//! same tuple.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::ArchivalConfig;
use crate::db::{ArchivePayload, Store, queue_status};
use crate::entities::video_queue;

pub mod download;
pub mod storage;

use storage::{StorageClient, file_key, storage_path};

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub struct WorkerState {
    store: Store,
    config: ArchivalConfig,
    proxy_base: String,
    storage: StorageClient,
    http: Client,
    /// Bounds jobs in flight across poller and webhook.
    jobs: Semaphore,
    /// Tuples currently being processed in this instance.
    active_keys: Mutex<HashSet<String>>,
    /// Serialises commits to one storage repo; concurrent commits conflict
    /// at the hub and fail with 412.
    repo_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkerState {
    #[must_use]
    pub fn new(store: Store, config: ArchivalConfig, proxy_base: String) -> Self {
        let storage = StorageClient::new(config.storage.clone());
        let jobs = Semaphore::new(config.max_concurrent_jobs);
        Self {
            store,
            config,
            proxy_base: proxy_base.trim_end_matches('/').to_string(),
            storage,
            http: Client::builder()
                .redirect(reqwest::redirect::Policy::limited(10))
                .build()
                .unwrap_or_default(),
            jobs,
            active_keys: Mutex::new(HashSet::new()),
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn repo_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.repo_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn proxy_url(&self, target: &str) -> String {
        format!(
            "{}/proxy?url={}",
            self.proxy_base,
            urlencoding::encode(target)
        )
    }
}

fn job_key(job: &video_queue::Model) -> String {
    format!(
        "{}:{}:{}:{}",
        job.mal_id,
        job.episode,
        job.provider,
        job.resolution.as_deref().unwrap_or("unknown")
    )
}

#[cfg(unix)]
fn free_space_gb(path: &Path) -> Option<f64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if rc != 0 {
        return None;
    }
    Some((stats.f_bavail as f64 * stats.f_frsize as f64) / (1024.0 * 1024.0 * 1024.0))
}

#[cfg(not(unix))]
fn free_space_gb(_path: &Path) -> Option<f64> {
    None
}

/// Dedup + semaphore wrapper around [`process_job`].
pub async fn run_job(state: Arc<WorkerState>, job: video_queue::Model) {
    let key = job_key(&job);

    {
        let mut active = state.active_keys.lock().await;
        if !active.insert(key.clone()) {
            debug!(key = %key, "skipping duplicate in-flight job");
            return;
        }
    }

    let permit = state.jobs.acquire().await;
    if permit.is_ok() {
        process_job(&state, &job).await;
    }

    state.active_keys.lock().await.remove(&key);
}

/// One job end to end: download, upload everywhere, commit, clean up.
async fn process_job(state: &WorkerState, job: &video_queue::Model) {
    info!(
        mal_id = job.mal_id,
        episode = job.episode,
        provider = %job.provider,
        resolution = job.resolution.as_deref().unwrap_or("unknown"),
        "processing archival job"
    );

    let fail = |error: String| async move {
        error!(job_id = job.id, error = %error, "archival job failed");
        state
            .store
            .update_queue_status(job.id, queue_status::FAILED, Some(&error))
            .await
            .ok();
    };

    if state.storage.account_count() == 0 {
        fail("no storage accounts configured".to_string()).await;
        return;
    }

    let scratch = match tempfile::Builder::new().prefix("weaboo_").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            fail(format!("scratch dir: {e}")).await;
            return;
        }
    };

    if let Some(free) = free_space_gb(scratch.path()) {
        if free < state.config.min_free_disk_gb {
            fail(format!("insufficient disk space: {free:.1}GB free")).await;
            return;
        }
    }

    let key = file_key(
        &state.config.salt,
        job.mal_id,
        job.episode,
        &job.provider,
        job.resolution.as_deref(),
    );
    let local_path = scratch.path().join(format!("{key}.mp4"));

    state
        .store
        .update_queue_status(job.id, queue_status::DOWNLOADING, None)
        .await
        .ok();

    if let Err(e) = download::fetch_video(&state.http, &job.video_url, &local_path).await {
        fail(format!("download: {e}")).await;
        return;
    }

    let size_mb = tokio::fs::metadata(&local_path)
        .await
        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0);
    info!(job_id = job.id, size_mb, "download complete");

    state
        .store
        .update_queue_status(job.id, queue_status::UPLOADING, None)
        .await
        .ok();

    let repo_path = storage_path(&state.config.namespace, job.mal_id, job.episode, &key);
    let summary = format!("add ep{} ({})", job.episode, job.provider);

    // Every account gets a copy; the first success becomes primary and is
    // the one committed to the store.
    let mut primary_committed = false;
    let mut uploads = 0usize;
    for (index, account) in state.storage.accounts().iter().enumerate() {
        let repo_id = match state.storage.ensure_repo(account).await {
            Ok(repo_id) => repo_id,
            Err(e) => {
                warn!(account = index + 1, error = %e, "storage repo unavailable");
                continue;
            }
        };

        let lock = state.repo_lock(&format!("{index}:{repo_id}")).await;
        let guard = lock.lock().await;
        let uploaded = state
            .storage
            .upload_file(account, &repo_id, &local_path, &repo_path, &summary)
            .await;
        drop(guard);

        match uploaded {
            Ok(uploaded) => {
                uploads += 1;
                if !primary_committed {
                    let stream_url = state.proxy_url(&uploaded.direct_url);
                    let payload = ArchivePayload {
                        mal_id: job.mal_id,
                        episode: job.episode,
                        provider: job.provider.clone(),
                        resolution: job.resolution.clone(),
                        file_key: key.clone(),
                        account_index: (index + 1) as i32,
                        repo_id: uploaded.repo_id,
                        path: uploaded.path,
                        direct_url: uploaded.direct_url,
                        stream_url,
                    };
                    match state.store.upsert_video_store(payload).await {
                        Ok(_) => {
                            primary_committed = true;
                            info!(job_id = job.id, account = index + 1, "primary commit done");
                        }
                        Err(e) => warn!(job_id = job.id, error = %e, "store commit failed"),
                    }
                }
            }
            Err(e) => warn!(account = index + 1, error = %e, "upload failed"),
        }
    }

    if !primary_committed {
        fail("upload failed for all storage accounts".to_string()).await;
        return;
    }

    info!(
        job_id = job.id,
        uploads,
        accounts = state.storage.account_count(),
        "archival job done"
    );

    fire_invalidation(state, job.mal_id, job.episode);
}

/// Best-effort ping so the API's scrape cache drops the now-stale entry.
fn fire_invalidation(state: &WorkerState, mal_id: i32, episode: i32) {
    let url = format!(
        "{}/api/v1/streaming/invalidate",
        state.config.api_base_url.trim_end_matches('/')
    );
    let body = json!({
        "mal_id": mal_id,
        "episode": episode,
        "secret": state.config.salt,
    });
    let client = state.http.clone();

    tokio::spawn(async move {
        let result = client
            .post(&url)
            .timeout(Duration::from_secs(5))
            .json(&body)
            .send()
            .await;
        if let Err(e) = result {
            debug!(url = %url, error = %e, "cache invalidation ping not delivered");
        }
    });
}

/// The 10-second poll loop. Stale in-flight jobs from a previous crash are
/// revived once before the first claim.
pub async fn poll_loop(state: Arc<WorkerState>) {
    match state
        .store
        .reset_stale_jobs(state.config.stale_after_minutes)
        .await
    {
        Ok(0) => {}
        Ok(reset) => info!(reset, "revived stale in-flight jobs"),
        Err(e) => warn!(error = %e, "stale job reset failed"),
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(state.config.poll_interval_seconds));
    info!(
        interval = state.config.poll_interval_seconds,
        batch = state.config.claim_batch,
        "worker poll loop started"
    );

    loop {
        ticker.tick().await;

        match state.store.claim_pending_videos(state.config.claim_batch).await {
            Ok(jobs) if !jobs.is_empty() => {
                info!(claimed = jobs.len(), "claimed pending jobs");
                for job in jobs {
                    tokio::spawn(run_job(state.clone(), job));
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "claim poll failed"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TriggerRequest {
    mal_id: i32,
    episode: i32,
    provider: String,
    video_url: String,
    resolution: Option<String>,
}

async fn trigger(
    State(state): State<Arc<WorkerState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<TriggerRequest>,
) -> Response {
    if bearer_token(&headers) != Some(state.config.salt.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"queued": false, "reason": "invalid webhook secret"})),
        )
            .into_response();
    }

    info!(
        mal_id = request.mal_id,
        episode = request.episode,
        provider = %request.provider,
        "webhook trigger received"
    );

    // Fast path: don't restart anything already moving or done.
    if let Ok(Some(existing)) = state
        .store
        .get_queue_entry(
            request.mal_id,
            request.episode,
            &request.provider,
            request.resolution.as_deref(),
        )
        .await
    {
        if matches!(
            existing.status.as_str(),
            queue_status::DOWNLOADING | queue_status::UPLOADING | queue_status::READY
        ) {
            return Json(json!({"queued": false, "reason": existing.status})).into_response();
        }
    }

    // The enqueue is idempotent and gives the job a queue row to report
    // status against even when the webhook beat the API's own insert.
    let job = match state
        .store
        .enqueue_video(
            request.mal_id,
            request.episode,
            &request.provider,
            &request.video_url,
            request.resolution.as_deref(),
        )
        .await
    {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "webhook enqueue failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"queued": false, "reason": "enqueue failed"})),
            )
                .into_response();
        }
    };

    tokio::spawn(run_job(state.clone(), job));

    Json(json!({
        "queued": true,
        "mal_id": request.mal_id,
        "episode": request.episode,
        "provider": request.provider,
    }))
    .into_response()
}

async fn health(State(state): State<Arc<WorkerState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "storage_accounts": state.storage.account_count(),
    }))
}

async fn status(State(state): State<Arc<WorkerState>>) -> Response {
    let queue = match state.store.queue_counts().await {
        Ok(counts) => counts,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };
    let archived = state.store.archived_count().await.unwrap_or(0);

    Json(json!({
        "queue": queue,
        "archived": archived,
    }))
    .into_response()
}

pub fn router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/trigger", post(trigger))
        .with_state(state)
}
