//! HTTP trigger and status server.
//!
//! The upstream identity provider authenticates the caller and forwards
//! the verified user id in the `x-user-id` header. Every `/backups` route
//! requires it; a backup owned by someone else is reported as not found.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/backups` | Submit a raw archive (request body), optional `x-tier` |
//! | `POST` | `/backups/{id}/process` | Trigger processing |
//! | `GET`  | `/backups/{id}` | Backup record and status |
//! | `GET`  | `/backups/{id}/snapshot` | Aggregated stats and insight report |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "backup 1234 not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `already_processing` (409), `internal` (500).

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use profile_vault_core::models::{BackupRecord, Snapshot, Tier};

use crate::config::Config;
use crate::lifecycle::{Lifecycle, LifecycleError, ProcessOutcome};

#[derive(Clone)]
struct AppState {
    lifecycle: Arc<Lifecycle>,
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let lifecycle = crate::commands::open_lifecycle(config).await?;
    let app = router(Arc::new(lifecycle));

    println!("pvault server listening on http://{}", bind_addr);
    info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router over `lifecycle`.
pub fn router(lifecycle: Arc<Lifecycle>) -> Router {
    let body_limit = usize::try_from(lifecycle.config().limits.max_total_bytes)
        .unwrap_or(usize::MAX);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/backups", post(handle_submit))
        .route("/backups/{id}", get(handle_status))
        .route("/backups/{id}/process", post(handle_process))
        .route("/backups/{id}/snapshot", get(handle_snapshot))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(AppState { lifecycle })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        let message = err.to_string();
        match err {
            LifecycleError::NotFound(_) => not_found(message),
            LifecycleError::Invalid(_) => bad_request(message),
            LifecycleError::AlreadyProcessing(_) => AppError {
                status: StatusCode::CONFLICT,
                code: "already_processing".to_string(),
                message,
            },
            LifecycleError::Store(e) => {
                error!(error = %e, "store failure");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal".to_string(),
                    message: "internal storage error".to_string(),
                }
            }
        }
    }
}

fn user_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| bad_request("missing x-user-id header"))
}

/// Fetch a backup, hiding records owned by other users.
async fn owned_backup(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
) -> Result<BackupRecord, AppError> {
    let user = user_id(headers)?;
    let record = state.lifecycle.status(id).await?;
    if record.owner_id != user {
        return Err(not_found(format!("backup {} not found", id)));
    }
    Ok(record)
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

// ============ POST /backups ============

#[derive(Serialize)]
struct SubmitResponse {
    backup: BackupRecord,
    duplicate: bool,
}

async fn handle_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let user = user_id(&headers)?;
    let tier = match headers.get("x-tier").and_then(|v| v.to_str().ok()) {
        Some(value) => value
            .parse::<Tier>()
            .map_err(|e| bad_request(e.to_string()))?,
        None => Tier::default(),
    };

    let submission = state.lifecycle.submit(&user, tier, body.to_vec()).await?;
    let status = if submission.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(SubmitResponse {
            backup: submission.record,
            duplicate: submission.duplicate,
        }),
    ))
}

// ============ POST /backups/{id}/process ============

#[derive(Serialize)]
struct ProcessResponse {
    outcome: &'static str,
    backup: BackupRecord,
}

async fn handle_process(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ProcessResponse>, AppError> {
    owned_backup(&state, &headers, &id).await?;

    let outcome = state.lifecycle.process(&id).await?;
    let label = match &outcome {
        ProcessOutcome::Processed(_) => "processed",
        ProcessOutcome::AlreadyReady(_) => "already_ready",
        ProcessOutcome::Failed(_) => "failed",
    };
    Ok(Json(ProcessResponse {
        outcome: label,
        backup: outcome.record().clone(),
    }))
}

// ============ GET /backups/{id} ============

async fn handle_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BackupRecord>, AppError> {
    Ok(Json(owned_backup(&state, &headers, &id).await?))
}

// ============ GET /backups/{id}/snapshot ============

async fn handle_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Snapshot>, AppError> {
    owned_backup(&state, &headers, &id).await?;
    Ok(Json(state.lifecycle.snapshot(&id).await?))
}
