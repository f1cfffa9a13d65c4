//! HTTP query surface for the relay registry
//!
//! JSON endpoints over the orchestrator plus a background task that sweeps
//! expired registry entries.

use crate::error::RelayError;
use crate::link::LinkRecord;
use crate::media::SourceLocator;
use crate::orchestrator::RelayOrchestrator;
use crate::progress::LogSurface;
use crate::registry::{FileId, RegistryStats, RelayRegistry};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RelayOrchestrator>,
    pub allow_local_sources: bool,
}

impl AppState {
    pub fn new(orchestrator: Arc<RelayOrchestrator>) -> Self {
        Self {
            orchestrator,
            allow_local_sources: false,
        }
    }

    pub fn with_local_sources(mut self, allow: bool) -> Self {
        self.allow_local_sources = allow;
        self
    }
}

/// Body of `POST /api/relay`
#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub source: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Body of `POST /api/relink`
#[derive(Debug, Deserialize)]
pub struct RelinkRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub category: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn not_found(id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: format!("File {} not found or expired. Please upload it again.", id),
            category: "registry".to_string(),
        }),
    )
}

fn relay_error(err: &RelayError) -> ApiError {
    let status = match err {
        RelayError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::SizeLimit { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        RelayError::Download(_) | RelayError::Upload(_) => StatusCode::BAD_GATEWAY,
        RelayError::UploadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RelayError::LinkGeneration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        RelayError::NotStored { .. } => StatusCode::NOT_FOUND,
        RelayError::Lookup { .. } => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorBody {
            error: err.user_message(),
            category: err.category().to_string(),
        }),
    )
}

fn lookup(state: &AppState, id: &str) -> Result<LinkRecord, ApiError> {
    let file_id = FileId::from_hex(id).ok_or_else(|| not_found(id))?;
    state
        .orchestrator
        .resolve(&file_id)
        .map_err(|_| not_found(id))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ferry",
    }))
}

async fn file_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LinkRecord>, ApiError> {
    lookup(&state, &id).map(Json)
}

async fn stream_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Redirect, ApiError> {
    let record = lookup(&state, &id)?;
    Ok(Redirect::temporary(&record.primary_url))
}

async fn stats_handler(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.orchestrator.registry().stats())
}

async fn relay_handler(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> Response {
    if !state.allow_local_sources
        && matches!(SourceLocator::parse(&request.source), SourceLocator::Path(_))
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "Only http(s) sources are accepted.".to_string(),
                category: "validation".to_string(),
            }),
        )
            .into_response();
    }

    match state
        .orchestrator
        .relay_source(&request.source, request.name, Arc::new(LogSurface))
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => relay_error(&e).into_response(),
    }
}

async fn relink_handler(
    State(state): State<AppState>,
    Json(request): Json<RelinkRequest>,
) -> Response {
    match state.orchestrator.relink(&request.name).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => relay_error(&e).into_response(),
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/files/:id", get(file_handler))
        .route("/stream/:id", get(stream_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/relay", post(relay_handler))
        .route("/api/relink", post(relink_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Sweep `registry` every `interval` until the task is aborted
pub fn spawn_sweeper(registry: Arc<RelayRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep();
            tracing::debug!(removed, remaining = registry.len(), "registry sweep");
        }
    })
}

/// Serve until `shutdown` resolves
pub async fn run_server<F>(
    addr: SocketAddr,
    state: AppState,
    sweep_interval: Duration,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sweeper = spawn_sweeper(Arc::clone(state.orchestrator.registry()), sweep_interval);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Ferry listening on http://{}", listener.local_addr()?);
    tracing::info!("   Health: http://{}/health", addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    sweeper.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Clock, ManualClock};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(RelayRegistry::new(Duration::from_secs(10), clock.clone()));

        let record: LinkRecord = serde_json::from_value(serde_json::json!({
            "file_id": "00000000000000aa",
            "file_name": "a.pdf",
            "object_key": "a.pdf",
            "size": 1,
            "kind": "other",
            "primary_url": "https://example.com/a.pdf",
            "is_streamable": false,
            "created_at": clock.now(),
        }))
        .unwrap();
        registry.insert(record.file_id.clone(), record);

        let handle = spawn_sweeper(Arc::clone(&registry), Duration::from_secs(60));
        clock.advance(Duration::from_secs(11));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(registry.is_empty());
        handle.abort();
    }

    #[test]
    fn test_error_status_mapping() {
        let (status, body) = relay_error(&RelayError::SizeLimit {
            declared: 10,
            max: 5,
        });
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body.category, "validation");

        let (status, _) = relay_error(&RelayError::UploadTimeout {
            idle: Duration::from_secs(1),
        });
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }
}
