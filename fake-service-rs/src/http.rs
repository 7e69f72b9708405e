// fake-service-rs/src/http.rs
// HTTP front end: every non-reserved path runs the request handler

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use shared_types_rs::{Response, Transport};
use telemetrist::SpanContext;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::handler::Handler;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub uptime_seconds: u64,
    pub status: String,
}

/// Build the router: `/health` and `/ready` are answered directly, anything
/// else goes through the handler
pub fn router(handler: Arc<Handler>) -> Router {
    Lazy::force(&START_TIME);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .fallback(request_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

/// Serve HTTP on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    handler: Arc<Handler>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    log::info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(handler))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn request_handler(
    State(handler): State<Arc<Handler>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let parent = SpanContext::from_headers(|name| headers.get(name).and_then(|v| v.to_str().ok()));
    let response = handler.handle(Transport::Http, parent).await;
    json_response(&response)
}

fn json_response(response: &Response) -> impl IntoResponse {
    let status = u16::try_from(response.code)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (status, [(CONTENT_TYPE, "application/json")], response.to_json())
}

/// GET /health
async fn health_handler(State(handler): State<Arc<Handler>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        service_name: handler.name().to_string(),
        uptime_seconds: START_TIME.elapsed().as_secs(),
        status: "SERVING".to_string(),
    })
}

/// GET /ready
async fn ready_handler(State(handler): State<Arc<Handler>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        service_name: handler.name().to_string(),
        uptime_seconds: START_TIME.elapsed().as_secs(),
        status: "READY".to_string(),
    })
}
