//! Range-forwarding stream proxy.
//!
//! Clients always play through `/proxy?url=...`: today the target is an
//! ephemeral CDN URL, after archival it is the durable copy, and the
//! switch is invisible because the proxy normalises headers either way.
//! Playlists are rewritten line by line so nested segments loop back
//! through the proxy.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer, ExposeHeaders};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("Upstream connect failure")]
    UpstreamConnect(#[from] reqwest::Error),
    #[error("Upstream error")]
    Upstream(StatusCode),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
            Self::UpstreamConnect(e) => {
                warn!(error = %e, "upstream connect failure");
                (StatusCode::BAD_GATEWAY, "Upstream connect failure".to_string())
            }
            Self::Upstream(status) => (status, "Upstream error".to_string()),
        };

        (
            status,
            Json(json!({
                "success": false,
                "error": status.canonical_reason().unwrap_or("Error"),
                "message": message,
            })),
        )
            .into_response()
    }
}

const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Hostname suffixes of the durable object store. Range requests against
/// these go through a HEAD-resolve first: the store answers with a
/// redirect to a signed CDN URL, and an extra hop in the middle of a
/// range response breaks seeking on some players.
const DURABLE_HOSTS: [&str; 1] = ["huggingface.co"];

pub struct ProxyState {
    client: Client,
    base_url: String,
}

impl ProxyState {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .redirect(reqwest::redirect::Policy::limited(10))
                .connect_timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

fn is_hls_url(url: &Url) -> bool {
    url.path().to_lowercase().ends_with(".m3u8")
}

fn is_hls_content_type(content_type: &str) -> bool {
    let lowered = content_type.to_lowercase();
    lowered.contains("application/vnd.apple.mpegurl") || lowered.contains("application/x-mpegurl")
}

fn is_durable_host(url: &Url) -> bool {
    url.host_str().is_some_and(|host| {
        DURABLE_HOSTS
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    })
}

/// Rewrite every URI line of a playlist to loop through the proxy.
/// Comments and blank lines survive verbatim; relative URIs are
/// absolutised against the playlist's own URL first.
#[must_use]
pub fn rewrite_hls(body: &str, playlist_url: &Url, proxy_base: &str) -> String {
    let mut out: Vec<String> = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            out.push(line.to_string());
            continue;
        }

        let absolute = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            match playlist_url.join(trimmed) {
                Ok(joined) => joined.to_string(),
                Err(_) => {
                    out.push(line.to_string());
                    continue;
                }
            }
        };

        out.push(format!(
            "{proxy_base}/proxy?url={}",
            urlencoding::encode(&absolute)
        ));
    }

    let mut rewritten = out.join("\n");
    if body.ends_with('\n') {
        rewritten.push('\n');
    }
    rewritten
}

async fn serve_playlist(state: &ProxyState, target: Url) -> Result<Response, ProxyError> {
    let response = state
        .client
        .get(target.clone())
        .header(header::USER_AGENT, BROWSER_UA)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        return Err(ProxyError::Upstream(status));
    }

    // Redirects may have moved the playlist; relative segment URIs
    // resolve against where it actually lives.
    let final_url = Url::parse(response.url().as_str()).unwrap_or(target);
    let body = response.text().await?;

    let rewritten = rewrite_hls(&body, &final_url, &state.base_url);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(HLS_CONTENT_TYPE)),
            (header::CONTENT_DISPOSITION, HeaderValue::from_static("inline")),
            (header::ACCEPT_RANGES, HeaderValue::from_static("bytes")),
        ],
        rewritten,
    )
        .into_response())
}

async fn serve_stream(
    state: &ProxyState,
    target: Url,
    client_headers: &HeaderMap,
) -> Result<Response, ProxyError> {
    // Two-hop resolve for the durable store: discover the signed CDN URL
    // first, then issue the real ranged GET straight at it.
    let target = if is_durable_host(&target) {
        match state
            .client
            .head(target.clone())
            .header(header::USER_AGENT, BROWSER_UA)
            .send()
            .await
        {
            Ok(head) => Url::parse(head.url().as_str()).unwrap_or(target),
            Err(e) => {
                debug!(url = %target, error = %e, "durable HEAD resolve failed, using original");
                target
            }
        }
    } else {
        target
    };

    let mut request = state
        .client
        .get(target.clone())
        .header(header::USER_AGENT, BROWSER_UA);

    // The client's Range header is the only one forwarded upstream.
    if let Some(range) = client_headers.get(header::RANGE) {
        request = request.header(header::RANGE, range.clone());
    }

    let upstream = request.send().await?;

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let upstream_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let content_type = if is_hls_content_type(&upstream_type) || is_hls_url(&target) {
        HLS_CONTENT_TYPE
    } else {
        "video/mp4"
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    for name in [header::CONTENT_LENGTH, header::CONTENT_RANGE] {
        if let Some(value) = upstream.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("inline"));

    let body = Body::from_stream(upstream.bytes_stream());

    let mut response = Response::builder().status(status);
    if let Some(response_headers) = response.headers_mut() {
        response_headers.extend(headers);
    }
    Ok(response
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

async fn proxy(
    State(state): State<Arc<ProxyState>>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let raw = query
        .url
        .ok_or(ProxyError::BadRequest("Missing url parameter"))?;

    let target =
        Url::parse(&raw).map_err(|_| ProxyError::BadRequest("url must be an absolute URL"))?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(ProxyError::BadRequest("url must be http or https"));
    }

    if is_hls_url(&target) {
        serve_playlist(&state, target).await
    } else {
        serve_stream(&state, target, &headers).await
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

pub fn router(base_url: &str) -> Router {
    let state = Arc::new(ProxyState::new(base_url));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(AllowMethods::list([Method::GET, Method::HEAD, Method::OPTIONS]))
        .allow_headers(AllowHeaders::list([header::RANGE]))
        .expose_headers(ExposeHeaders::list([
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
        ]));

    Router::new()
        .route("/proxy", get(proxy))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_hls_preserves_comments_and_count() {
        let playlist = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nindex-v1-a1.m3u8?t=X\n";
        let base = Url::parse("https://cdn.example/hls/master.m3u8").unwrap();
        let rewritten = rewrite_hls(playlist, &base, "https://proxy.example");

        assert_eq!(rewritten.lines().count(), playlist.lines().count());
        let lines: Vec<&str> = rewritten.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-STREAM-INF:BANDWIDTH=800000");
        assert_eq!(
            lines[2],
            format!(
                "https://proxy.example/proxy?url={}",
                urlencoding::encode("https://cdn.example/hls/index-v1-a1.m3u8?t=X")
            )
        );
    }

    #[test]
    fn test_rewrite_hls_absolute_uri_and_blank_lines() {
        let playlist = "#EXTM3U\n\nhttps://other.cdn/seg-1.ts\n";
        let base = Url::parse("https://cdn.example/hls/index.m3u8").unwrap();
        let rewritten = rewrite_hls(playlist, &base, "https://proxy.example");

        let lines: Vec<&str> = rewritten.lines().collect();
        assert_eq!(lines[1], "");
        assert!(lines[2].starts_with("https://proxy.example/proxy?url="));
        assert!(rewritten.ends_with('\n'));
    }

    #[test]
    fn test_proxy_url_roundtrip() {
        let original = "https://cdn.example/v.mp4?sig=a b&x=1";
        let encoded = urlencoding::encode(original).to_string();
        let decoded = urlencoding::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_is_hls_url() {
        assert!(is_hls_url(&Url::parse("https://c/x/master.M3U8").unwrap()));
        assert!(!is_hls_url(&Url::parse("https://c/x/video.mp4").unwrap()));
        assert!(!is_hls_url(
            &Url::parse("https://c/v.mp4?fake=.m3u8").unwrap()
        ));
    }

    #[test]
    fn test_is_durable_host() {
        assert!(is_durable_host(
            &Url::parse("https://huggingface.co/datasets/u/r/resolve/main/f.mp4").unwrap()
        ));
        assert!(!is_durable_host(&Url::parse("https://cdn.example/f.mp4").unwrap()));
    }
}
