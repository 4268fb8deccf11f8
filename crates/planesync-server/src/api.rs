// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API.
//!
//! | Method | Path | |
//! |---|---|---|
//! | `POST` | `/api/v1/user-role-sync` | start a synchronization, `202` |
//! | `GET` | `/api/v1/workflows/{workflow_id}/status` | latest progress projection |
//! | `GET` | `/api/v1/workflows/{workflow_id}` | lifecycle of the latest instance |
//! | `GET` | `/health` | database health |
//!
//! Every error body is `{"code": ..., "message": ...}`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use planesync_sdk::{Engine, Persistence, SdkError, WorkflowDescription};
use planesync_user_sync::{
    SyncUserRoleInput, SyncUserRoleWorkflow, WorkflowStatus, get_status, workflow_id_for,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: Engine,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/user-role-sync", post(start_sync_handler))
        .route(
            "/api/v1/workflows/{workflow_id}/status",
            get(workflow_status_handler),
        )
        .route("/api/v1/workflows/{workflow_id}", get(describe_workflow_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ========== Errors ==========

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Error returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// The engine could not take the request at all.
    fn unavailable(err: SdkError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, err.error_code(), err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<SdkError> for ApiError {
    fn from(err: SdkError) -> Self {
        let status = match &err {
            SdkError::AlreadyRunning { .. } => StatusCode::CONFLICT,
            SdkError::NotFound(_) => StatusCode::NOT_FOUND,
            SdkError::Config(_) => StatusCode::BAD_REQUEST,
            SdkError::ShuttingDown | SdkError::UnknownWorkflow(_) => StatusCode::SERVICE_UNAVAILABLE,
            SdkError::Checkpoint(_)
            | SdkError::Event(_)
            | SdkError::Serialization(_)
            | SdkError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.error_code(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "INVALID_REQUEST_BODY", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            code: self.code.to_string(),
            message: self.message,
        });
        (self.status, payload).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ========== Handlers ==========

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncResponse {
    pub workflow_id: String,
    pub instance_id: String,
}

/// Start a synchronization for the user named in the body.
///
/// The request is validated inside the workflow, so a malformed but
/// well-typed request still gets an instance whose failure kind is
/// `ValidationError`.
pub async fn start_sync_handler(
    State(state): State<AppState>,
    body: Result<Json<SyncUserRoleInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<StartSyncResponse>)> {
    let Json(input) = body?;
    let workflow_id = workflow_id_for(&input.tenant_id, &input.user_id);
    let tenant_id = input.tenant_id.clone();

    let handle = state
        .engine
        .start::<SyncUserRoleWorkflow>(&workflow_id, &tenant_id, input)
        .await
        .map_err(|err| match err {
            SdkError::AlreadyRunning { .. } => ApiError::from(err),
            other => {
                warn!(workflow_id = %workflow_id, error = %other, "Could not start user-role sync");
                ApiError::unavailable(other)
            }
        })?;

    info!(
        workflow_id = %handle.workflow_id(),
        instance_id = %handle.instance_id(),
        "User-role sync accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(StartSyncResponse {
            workflow_id: handle.workflow_id().to_string(),
            instance_id: handle.instance_id().to_string(),
        }),
    ))
}

pub async fn workflow_status_handler(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<WorkflowStatus>> {
    get_status(&state.engine, &workflow_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&workflow_id))
}

pub async fn describe_workflow_handler(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<WorkflowDescription>> {
    state
        .engine
        .describe(&workflow_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&workflow_id))
}

fn not_found(workflow_id: &str) -> ApiError {
    ApiError::from(SdkError::NotFound(format!("workflow '{}'", workflow_id)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_instances: i64,
}

pub async fn health_handler(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let persistence = state.engine.persistence();
    let unhealthy = |message: String| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "DATABASE_UNAVAILABLE", message)
    };

    match persistence.health_check_db().await {
        Ok(true) => {}
        Ok(false) => return Err(unhealthy("database health check failed".to_string())),
        Err(e) => return Err(unhealthy(e.to_string())),
    }

    let active_instances = persistence
        .count_active_instances()
        .await
        .map_err(|e| unhealthy(e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "ok",
        active_instances,
    }))
}
