use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use weaboo::config::Config;
use weaboo::db::MappingPatch;
use weaboo::state::SharedState;

async fn spawn_app() -> (Router, Arc<SharedState>, tempfile::TempDir) {
    let data_dir = tempfile::tempdir().expect("tempdir");

    let mut config = Config::default();
    config.database.url = format!(
        "sqlite:{}",
        data_dir.path().join("test.db").to_string_lossy()
    );
    config.archival.salt = "test-salt".to_string();
    // Scrapes in tests hit nothing routable; fail fast.
    config.scrape.request_timeout_seconds = 1;

    let state = Arc::new(
        SharedState::new(config, None)
            .await
            .expect("Failed to create app state"),
    );
    (weaboo::api::router(state.clone()), state, data_dir)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_and_root_descriptor() {
    let (app, _state, _guard) = spawn_app().await;

    for uri in ["/", "/health"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["name"], "weaboo-api");
        assert_eq!(json["status"], "ok");
    }
}

#[tokio::test]
async fn test_metrics_endpoint_without_recorder() {
    let (app, _state, _guard) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // No recorder installed in tests; the endpoint still answers.
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_shape() {
    let (app, _state, _guard) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/definitely-not-a-route")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Not Found");
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn test_anime_requires_known_provider() {
    let (app, _state, _guard) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/anime/some-slug")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/anime/some-slug?provider=nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_streaming_validates_ids() {
    let (app, _state, _guard) = spawn_app().await;

    for uri in ["/api/v1/streaming/0/1", "/api/v1/streaming/55825/0"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
    }
}

#[tokio::test]
async fn test_seeded_mapping_served_from_cache() {
    let (app, state, _guard) = spawn_app().await;

    state
        .store
        .upsert_mapping(MappingPatch {
            mal_id: 55825,
            title_main: Some("Jigokuraku 2nd Season".to_string()),
            slug_animasu: Some("jigokuraku-s2".to_string()),
            slug_samehadaku: Some("jigokuraku-season-2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/anime/jigokuraku-s2?provider=animasu")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["cached"], true);
    assert_eq!(json["data"]["mapping"]["mal_id"], 55825);
    assert_eq!(
        json["data"]["mapping"]["slug_samehadaku"],
        "jigokuraku-season-2"
    );
}

#[tokio::test]
async fn test_invalidate_requires_secret() {
    let (app, _state, _guard) = spawn_app().await;

    let request = |secret: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/v1/streaming/invalidate")
            .header("Content-Type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "mal_id": 55825,
                    "episode": 1,
                    "secret": secret,
                })
                .to_string(),
            ))
            .unwrap()
    };

    let response = app.clone().oneshot(request("wrong")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(request("test-salt")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    // Nothing cached for the key yet.
    assert_eq!(json["invalidated"], false);
}

#[tokio::test]
async fn test_search_requires_known_genre() {
    let (app, _state, _guard) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/search")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/search?genre=not-a-genre")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
