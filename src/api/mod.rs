use axum::{
    Json, Router,
    http::{StatusCode, Uri},
    middleware,
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

mod anime;
mod error;
mod home;
mod observability;
mod streaming;
mod types;

pub use error::ApiError;
pub use types::*;

async fn service_descriptor() -> Json<ServiceDescriptor> {
    Json(ServiceDescriptor {
        name: "weaboo-api",
        version: env!("CARGO_PKG_VERSION"),
        status: "ok",
    })
}

async fn not_found(uri: Uri) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Not Found",
            "message": format!("No route for {uri}"),
        })),
    )
}

pub fn router(state: Arc<SharedState>) -> Router {
    let v1 = Router::new()
        .route("/home", get(home::get_home))
        .route("/search", get(home::browse_genre))
        .route("/anime/mal/{mal_id}", get(anime::get_by_mal_id))
        .route("/anime/{slug}", get(anime::get_by_slug))
        .route("/streaming/invalidate", post(streaming::invalidate))
        .route("/streaming/{mal_id}/{episode}", get(streaming::get_streaming));

    Router::new()
        .route("/", get(service_descriptor))
        .route("/health", get(service_descriptor))
        .route("/metrics", get(observability::get_metrics))
        .nest("/api/v1", v1)
        .fallback(not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
        .with_state(state)
}
