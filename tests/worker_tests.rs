use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use weaboo::config::ArchivalConfig;
use weaboo::db::Store;
use weaboo::worker::{WorkerState, router};

async fn spawn_worker() -> axum::Router {
    let store = Store::with_pool_options("sqlite::memory:", 1, 1)
        .await
        .expect("Failed to create in-memory store");

    let config = ArchivalConfig {
        salt: "test-salt".to_string(),
        ..Default::default()
    };

    router(Arc::new(WorkerState::new(
        store,
        config,
        "http://localhost:7862".to_string(),
    )))
}

#[tokio::test]
async fn test_health_reports_accounts() {
    let app = spawn_worker().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage_accounts"], 0);
}

#[tokio::test]
async fn test_status_returns_queue_counters() {
    let app = spawn_worker().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["archived"], 0);
    assert!(json["queue"].is_object());
}

#[tokio::test]
async fn test_trigger_requires_bearer_salt() {
    let app = spawn_worker().await;

    let body = serde_json::json!({
        "mal_id": 55825,
        "episode": 1,
        "provider": "animasu",
        "video_url": "https://cdn.example/v.mp4",
        "resolution": "720p",
    })
    .to_string();

    let request = |auth: Option<&str>| {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/trigger")
            .header("Content-Type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(Body::from(body.clone())).unwrap()
    };

    let response = app.clone().oneshot(request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(request(Some("Bearer wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(request(Some("Bearer test-salt")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["queued"], true);
}
