//! Routes:
//!
//! - `GET  /dune-data` → `{timestamp, data}` or 404 when nothing is buffered yet.
//! - `POST /refresh`   → manual refresh, `x-api-key` header checked against the
//!   configured secret.
//! - `GET  /health`    → liveness probe.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::core::buffer::Buffer;
use crate::core::refresh::RefreshError;
use crate::core::trigger::{ManualTrigger, TriggerError};

/// Request header carrying the manual-refresh secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for the handlers.
#[derive(Clone)]
pub struct QueryState {
    buffer: Arc<Buffer>,
    trigger: ManualTrigger,
}

impl QueryState {
    /// Builds the state around a trigger; reads go to the trigger's buffer.
    pub fn new(trigger: ManualTrigger) -> Self {
        Self {
            buffer: trigger.pipeline().buffer().clone(),
            trigger,
        }
    }
}

/// Failures surfaced to HTTP clients.
#[derive(Debug)]
pub enum QueryError {
    /// No refresh has succeeded yet.
    NotPopulated,
    /// Manual refresh presented a wrong or missing secret.
    Unauthorized,
    /// Manual refresh was authorized but failed.
    RefreshFailed(RefreshError),
}

impl From<TriggerError> for QueryError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Unauthorized => QueryError::Unauthorized,
            TriggerError::Refresh(e) => QueryError::RefreshFailed(e),
        }
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            QueryError::NotPopulated => {
                debug!("No buffered data found in memory");
                (
                    StatusCode::NOT_FOUND,
                    json!({
                        "error": "No buffered data available",
                        "message": "The buffer has not been populated yet. Try again later."
                    }),
                )
            }
            QueryError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "Unauthorized",
                    "message": "Invalid API key"
                }),
            ),
            QueryError::RefreshFailed(e) => {
                error!("Error refreshing buffer: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "Internal Server Error",
                        "message": "Failed to refresh buffer"
                    }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Builds the router with permissive CORS.
pub fn router(state: QueryState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/dune-data", get(read_handler))
        .route("/refresh", post(refresh_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Serves `app` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Query interface listening on {}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn read_handler(State(state): State<QueryState>) -> Result<Response, QueryError> {
    let snapshot = state.buffer.read().ok_or(QueryError::NotPopulated)?;
    Ok(Json(&*snapshot).into_response())
}

async fn refresh_handler(
    State(state): State<QueryState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, QueryError> {
    let presented = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if presented.is_none() && state.trigger.requires_secret() {
        warn!("Manual refresh requested without {} header", API_KEY_HEADER);
    }

    let snapshot = state.trigger.fire(presented).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Buffer refreshed successfully",
        "timestamp": snapshot.captured_at().to_rfc3339_opts(SecondsFormat::Millis, true)
    })))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }))
}
