//! HTTP surface: webhook intake plus thin pipeline/admin/geo routes.
//!
//! Handlers enqueue work or read state; all heavy lifting happens in
//! the worker. Failures map to structured `{error}` JSON with a status
//! reflecting the failure class (400 malformed input, 401 auth, 404
//! missing resource, 500 config, 502 upstream failure).

pub mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration as ChronoDuration;
use tokio::net::TcpListener;

use crate::adapters::RecorderClient;
use crate::config::Config;
use crate::ingest::TeamDirectory;
use crate::storage::{AnalysisStore, CallStore, Database, EventStore, JobQueue, StorageError};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub events: EventStore,
    pub queue: JobQueue,
    pub calls: CallStore,
    pub analysis: AnalysisStore,
    pub recorder: Option<RecorderClient>,
    pub webhook_secret: Option<String>,
    pub pipeline_api_key: Option<String>,
    pub directory: TeamDirectory,
    pub crm_pipeline_id: Option<String>,
    pub crm_stage_id: Option<String>,
}

impl std::ops::Deref for AppState {
    type Target = AppStateInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Self {
        let recorder = config
            .recorder_api_key
            .as_ref()
            .map(|key| RecorderClient::new(config.recorder_base_url.clone(), key.clone()));

        Self {
            inner: Arc::new(AppStateInner {
                events: EventStore::new(db.clone()),
                queue: JobQueue::new(
                    db.clone(),
                    ChronoDuration::seconds(config.worker.lease_timeout_secs as i64),
                ),
                calls: CallStore::new(db.clone()),
                analysis: AnalysisStore::new(db),
                recorder,
                webhook_secret: config.webhook_secret.clone(),
                pipeline_api_key: config.pipeline_api_key.clone(),
                directory: config.team.clone(),
                crm_pipeline_id: config.crm_pipeline_id.clone(),
                crm_stage_id: config.crm_stage_id.clone(),
            }),
        }
    }
}

/// API failure classes and their HTTP mapping
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Config(String),
    Upstream(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Config(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
            Self::Upstream(m) => (StatusCode::BAD_GATEWAY, m),
            Self::Internal(e) => {
                tracing::error!(error = %e, "Unhandled API error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => Self::NotFound(what),
            other => Self::Internal(other.into()),
        }
    }
}

/// Build the router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/recorder", post(routes::webhook))
        .route("/api/pipeline/process", post(routes::pipeline_process))
        .route("/api/pipeline/extract-info", post(routes::extract_info))
        .route("/api/admin/import-meeting", post(routes::import_meeting))
        .route("/api/admin/reprocess", post(routes::reprocess))
        .route("/api/geo/trigger", post(routes::geo_trigger))
        .route("/api/geo/weekly", post(routes::geo_weekly))
        .route("/api/geo/runs", get(routes::geo_runs))
        .route("/api/geo/results", get(routes::geo_results))
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: AppState, bind_addr: &str) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;
    tracing::info!(%bind_addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}
