//! Twirp-compatible JSON transport for the Push operation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use super::{PushRequest, PushResponse, StatsService};
use crate::error::StatsError;

/// Route of the Push method.
pub const PUSH_PATH: &str = "/twirp/stats.StatsService/Push";

/// Address of the client that made the request. Empty when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Build the HTTP router for `service`.
pub fn router(service: Arc<StatsService>, max_body_bytes: usize) -> Router {
    Router::new()
        .route(PUSH_PATH, post(push))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(client_ip))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Attach the [`ClientIp`] extension to every request.
async fn client_ip(mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = resolve_client_ip(req.headers(), peer);
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

/// Forwarding headers win over the socket peer.
fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header("x-forwarded-for") {
        if let Some(first) = forwarded.split(", ").next() {
            return first.to_owned();
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_owned();
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy"
    }))
}

async fn push(
    State(service): State<Arc<StatsService>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    payload: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Json<PushResponse>, HttpError> {
    let Json(request) = payload?;
    Ok(Json(service.push(request, ip)?))
}

/// Error body in the Twirp wire format.
#[derive(Debug, Serialize)]
pub struct HttpError {
    #[serde(skip)]
    status: StatusCode,
    code: &'static str,
    msg: String,
}

impl HttpError {
    /// HTTP status of the response.
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Twirp error code.
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl From<StatsError> for HttpError {
    fn from(error: StatsError) -> Self {
        match error {
            StatsError::InvalidRequest(msg) => Self {
                status: StatusCode::BAD_REQUEST,
                code: "invalid_argument",
                msg,
            },
            StatsError::FlusherDisabled => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "unavailable",
                msg: StatsError::FlusherDisabled.to_string(),
            },
            StatsError::Json(e) => Self {
                status: StatusCode::BAD_REQUEST,
                code: "malformed",
                msg: e.to_string(),
            },
            other => {
                // Hide internal details from clients
                tracing::error!(error = %other, "Push failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    msg: "internal error".to_owned(),
                }
            }
        }
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "malformed",
            msg: rejection.body_text(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(&self)).into_response()
    }
}
