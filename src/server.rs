//! HTTP host for the explanation pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | any    | `/api/explain-pdf` | Run the pipeline (`POST` to explain, `OPTIONS` for preflight, others → 405) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Every method is routed to the pipeline so that wrong-method requests
//! still get a JSON envelope with CORS headers instead of axum's bare 405.
//! Preflight requests are answered by the CORS layer with `204 No Content`.
//!
//! The body is handed to the pipeline unread; the pipeline enforces
//! `server.max_body_bytes` once its earlier gates have passed.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::cors;
use crate::envelope::PipelineResponse;
use crate::pipeline::{InboundRequest, Pipeline};
use crate::provider::SummaryProvider;

pub const EXPLAIN_PATH: &str = "/api/explain-pdf";

/// Shared state passed to route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Start the server with the OpenRouter provider.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(Arc::new(config.clone()))?;
    serve(Arc::new(pipeline)).await
}

/// Start the server with a custom [`SummaryProvider`].
pub async fn run_server_with_provider(
    config: &Config,
    provider: Arc<dyn SummaryProvider>,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(Arc::new(config.clone()), provider);
    serve(Arc::new(pipeline)).await
}

async fn serve(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bind_addr = pipeline.config().server.bind.clone();

    if let Some(limiter) = pipeline.rate_limiter().cloned() {
        let period = limiter.window();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(removed, tracked = limiter.len(), "swept rate-limit windows");
                }
            }
        });
    }

    let app = router(pipeline)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("explainer listening on http://{}{}", bind_addr, EXPLAIN_PATH);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Build the router. Exposed for embedding in a larger application.
///
/// Fails when `[cors].allowed_origins` holds an invalid origin.
pub fn router(pipeline: Arc<Pipeline>) -> anyhow::Result<Router> {
    let cors_layer = cors::layer(&pipeline.config().cors)?;

    Ok(Router::new()
        .route(EXPLAIN_PATH, any(handle_explain))
        .route("/health", get(handle_health))
        .layer(cors_layer)
        .layer(middleware::from_fn(preflight_no_content))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline }))
}

/// The CORS layer answers preflight with an empty `200`; report it as `204`.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

impl IntoResponse for PipelineResponse {
    fn into_response(self) -> Response {
        let body = self.body_bytes();
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response
    }
}

// ============ /api/explain-pdf ============

async fn handle_explain(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    state
        .pipeline
        .handle(InboundRequest {
            method: parts.method,
            headers: parts.headers,
            peer,
            body,
        })
        .await
        .into_response()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
