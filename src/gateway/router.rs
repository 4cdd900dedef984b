//! HTTP router and handlers

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::Error;
use crate::dispatch::ResponseEnvelope;
use crate::pipeline::{Pipeline, RequestContext};
use crate::route::RouteTable;

/// Shared application state
pub struct AppState {
    /// Admission pipeline every non-health request flows through
    pub pipeline: Pipeline,
    /// Live route table, exposed for health reporting
    pub routes: Arc<RouteTable>,
    /// Maximum buffered request body size (bytes)
    pub max_body_bytes: usize,
}

/// Create the router
///
/// `/health` is the only fixed path; everything else falls through to the
/// admission pipeline, which resolves the request against the route table.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(admission_handler)
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "routes": state.routes.len(),
        "stages": state.pipeline.stage_names(),
    }))
}

/// Catch-all handler feeding the admission pipeline
async fn admission_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, method, path, "Failed to buffer request body");
            let envelope = ResponseEnvelope {
                code: StatusCode::BAD_REQUEST.as_u16(),
                message: "Request body unreadable or too large".to_string(),
                data: serde_json::Value::Null,
            };
            return (StatusCode::BAD_REQUEST, Json(envelope)).into_response();
        }
    };

    let mut ctx = RequestContext::new(&method, &path, query, parts.headers, body, peer.ip());

    match state.pipeline.run(&mut ctx).await {
        Ok(envelope) => {
            let status = StatusCode::from_u16(envelope.code).unwrap_or(StatusCode::OK);
            (status, Json(envelope)).into_response()
        }
        Err(err) => error_response(&err, &method, &path),
    }
}

/// Map a pipeline error onto the response envelope
///
/// Rate-limit rejections carry a `Retry-After` header alongside the
/// envelope so well-behaved clients can back off without parsing the body.
fn error_response(err: &Error, method: &str, path: &str) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        warn!(method, path, error = %err, "Request failed");
    } else {
        debug!(method, path, error = %err, "Request rejected");
    }

    let envelope = ResponseEnvelope::from_error(err);
    let mut response = (status, Json(envelope)).into_response();
    if let Some(secs) = err.retry_after_secs() {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
