use axum::body::Body;
use axum::extract::Request as AxumRequest;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

const VIDEO_SIZE: usize = 4096;

fn video_bytes() -> Vec<u8> {
    (0..VIDEO_SIZE).map(|i| (i % 251) as u8).collect()
}

async fn serve_video(headers: HeaderMap) -> Response {
    let bytes = video_bytes();

    if let Some(range) = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
    {
        let (start, end) = range.split_once('-').unwrap_or(("0", ""));
        let start: usize = start.parse().unwrap_or(0);
        let end: usize = end.parse().unwrap_or(VIDEO_SIZE - 1).min(VIDEO_SIZE - 1);

        return (
            StatusCode::PARTIAL_CONTENT,
            [
                (
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{VIDEO_SIZE}"),
                ),
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=video.mp4".to_string(),
                ),
            ],
            bytes[start..=end].to_vec(),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response()
}

async fn serve_master(_request: AxumRequest) -> Response {
    let playlist = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nindex-v1-a1.m3u8?t=X\n";
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        playlist,
    )
        .into_response()
}

async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/video.mp4", get(serve_video))
        .route("/master.m3u8", get(serve_master));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    format!("http://{addr}")
}

const PROXY_BASE: &str = "http://proxy.local";

fn proxy_uri(target: &str) -> String {
    format!("/proxy?url={}", urlencoding::encode(target))
}

#[tokio::test]
async fn test_proxy_forwards_range_and_normalises_headers() {
    let upstream = spawn_upstream().await;
    let app = weaboo::proxy::router(PROXY_BASE);

    let response = app
        .oneshot(
            Request::builder()
                .uri(proxy_uri(&format!("{upstream}/video.mp4")))
                .header(header::RANGE, "bytes=0-1023")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    let headers = response.headers();
    assert_eq!(
        headers.get(header::CONTENT_RANGE).unwrap(),
        &format!("bytes 0-1023/{VIDEO_SIZE}")
    );
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp4");
    assert_eq!(headers.get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert_eq!(headers.get(header::CONTENT_DISPOSITION).unwrap(), "inline");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 1024);
    assert_eq!(&bytes[..], &video_bytes()[..1024]);
}

#[tokio::test]
async fn test_proxy_rewrites_master_playlist() {
    let upstream = spawn_upstream().await;
    let app = weaboo::proxy::router(PROXY_BASE);

    let response = app
        .oneshot(
            Request::builder()
                .uri(proxy_uri(&format!("{upstream}/master.m3u8")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.apple.mpegurl"
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    let last_line = body.lines().last().unwrap();

    let expected_target = format!("{upstream}/index-v1-a1.m3u8?t=X");
    assert_eq!(
        last_line,
        format!(
            "{PROXY_BASE}/proxy?url={}",
            urlencoding::encode(&expected_target)
        )
    );
    assert_eq!(body.lines().count(), 3);
    assert!(body.starts_with("#EXTM3U\n"));
}

#[tokio::test]
async fn test_proxy_rejects_bad_url_parameter() {
    let app = weaboo::proxy::router(PROXY_BASE);

    for uri in [
        "/proxy".to_string(),
        proxy_uri("not-an-absolute-url"),
        proxy_uri("ftp://example.com/file.mp4"),
    ] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri.clone()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
    }
}

#[tokio::test]
async fn test_proxy_maps_connect_failure_to_502() {
    let app = weaboo::proxy::router(PROXY_BASE);

    // Nothing listens on port 9; connect fails, not a client error.
    let response = app
        .oneshot(
            Request::builder()
                .uri(proxy_uri("http://127.0.0.1:9/video.mp4"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_proxy_health() {
    let app = weaboo::proxy::router(PROXY_BASE);

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
}
