//! # HTTP Server
//!
//! HTTP front end of the router, plus metrics and health checks.
//!
//! Provides endpoints:
//! - `POST /insert/{namespace}` - Insert one JSON document; errors arrive after the backoff delay
//! - `GET /backoff` - Error classes currently in an active backoff window
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe (returns 200 when the router is ready)

use crate::backoff::{BackoffController, ValidationError, ViolationKind};
use crate::observability::metrics;
use crate::router::{CatalogExecutor, WriteRequest};
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Header carrying the artificial delay applied to a response
pub const BACKOFF_DELAY_HEADER: &str = "x-backoff-delay-ms";

#[derive(Debug)]
pub struct ServerState {
    pub is_ready: AtomicBool,
    pub controller: Arc<BackoffController>,
    pub executor: Arc<CatalogExecutor>,
}

impl ServerState {
    pub fn new(controller: Arc<BackoffController>, executor: Arc<CatalogExecutor>) -> Self {
        Self {
            is_ready: AtomicBool::new(false),
            controller,
            executor,
        }
    }
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/insert/{namespace}", post(insert_handler))
        .route("/backoff", get(backoff_handler))
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn insert_handler(
    State(state): State<Arc<ServerState>>,
    Path(namespace): Path<String>,
    Json(document): Json<Value>,
) -> Response {
    let request = WriteRequest::new(namespace, document);
    let delivered = state
        .controller
        .handle(state.executor.as_ref(), request)
        .await;

    let mut response = match delivered.outcome {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(err) => validation_error_response(&err),
    };
    if let Ok(value) = HeaderValue::from_str(&millis(delivered.delay).to_string()) {
        response.headers_mut().insert(BACKOFF_DELAY_HEADER, value);
    }
    response
}

fn validation_error_response(err: &ValidationError) -> Response {
    let status = match err.kind {
        ViolationKind::UnknownNamespace => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    let body = json!({
        "error": err.kind,
        "namespace": err.namespace,
        "message": err.message,
    });
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
struct ActiveClass {
    class: String,
    count: u32,
    idle_ms: u64,
    window_age_ms: u64,
    next_delay_ms: u64,
}

async fn backoff_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let now = Instant::now();
    let policy = state.controller.policy();
    let mut classes: Vec<ActiveClass> = state
        .controller
        .ledger()
        .active_classes(now)
        .into_iter()
        .map(|r| ActiveClass {
            class: r.class.to_string(),
            count: r.count,
            idle_ms: millis(r.idle_for(now)),
            window_age_ms: millis(now.saturating_duration_since(r.window_start)),
            next_delay_ms: millis(policy.delay_for_count(r.count.saturating_add(1))),
        })
        .collect();
    classes.sort_by(|a, b| a.class.cmp(&b.class));
    metrics::set_active_classes(classes.len());

    Json(json!({
        "reset_window_ms": millis(state.controller.ledger().reset_window()),
        "max_delay_ms": millis(policy.max_delay),
        "classes": classes,
    }))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = metrics::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Wait until the server answers `/healthz` or the timeout expires
pub async fn wait_until_listening(port: u16, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        tokio::time::sleep(poll).await;
    }
    false
}
