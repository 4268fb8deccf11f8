// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for user-sync workflow tests: scripted fake activities and
//! an engine over in-memory SQLite.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use planesync_sdk::{
    ActivityContext, ActivityError, ActivityOptions, DuplicatePolicy, Engine, ExecutionError,
    SqlitePersistence, StatusBoard,
};
use planesync_user_sync::activities::{
    CreateOrUpdateUser, DeactivateUser, RevokeUserRole, RoleRevoked, RoleUpdated, UpdateUserRole,
    UserDeactivation, UserProvisioned,
};
use planesync_user_sync::{
    AppPlaneActivities, IdentityProviderActivities, SyncError, SyncResult, SyncUserRoleInput,
    SyncUserRoleWorkflow, WorkflowStatus, policy, workflow_id_for,
};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum AppPlaneCall {
    CreateOrUpdateUser(CreateOrUpdateUser),
    UpdateUserRole(UpdateUserRole),
    RevokeUserRole(RevokeUserRole),
}

/// Failure script: fail the next `remaining` calls with `error`.
#[derive(Debug, Clone)]
struct Script {
    remaining: u32,
    error: ActivityError,
}

fn next_failure(script: &Mutex<Option<Script>>) -> Option<ActivityError> {
    let mut guard = script.lock().unwrap();
    let script = guard.as_mut()?;
    if script.remaining == 0 {
        return None;
    }
    script.remaining -= 1;
    Some(script.error.clone())
}

/// Snapshot of the status board at the moment an activity was entered.
#[derive(Default)]
struct StatusRecorder {
    target: Mutex<Option<(Arc<StatusBoard>, String)>>,
    seen: Mutex<Vec<WorkflowStatus>>,
}

impl StatusRecorder {
    fn snapshot(&self) {
        let target = self.target.lock().unwrap();
        let Some((board, workflow_id)) = target.as_ref() else {
            return;
        };
        if let Some(value) = board.latest(workflow_id) {
            let status: WorkflowStatus = serde_json::from_value(value).unwrap();
            self.seen.lock().unwrap().push(status);
        }
    }
}

#[derive(Default)]
pub struct FakeAppPlane {
    calls: Mutex<Vec<AppPlaneCall>>,
    attempts: Mutex<Vec<(String, u32)>>,
    script: Mutex<Option<Script>>,
    recorder: StatusRecorder,
}

impl FakeAppPlane {
    pub fn fail_always(&self, error: ActivityError) {
        self.fail_times(u32::MAX, error);
    }

    pub fn fail_times(&self, times: u32, error: ActivityError) {
        *self.script.lock().unwrap() = Some(Script {
            remaining: times,
            error,
        });
    }

    pub fn observe_status(&self, board: Arc<StatusBoard>, workflow_id: &str) {
        *self.recorder.target.lock().unwrap() = Some((board, workflow_id.to_string()));
    }

    pub fn calls(&self) -> Vec<AppPlaneCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `(idempotency key, attempt)` of every invocation.
    pub fn attempts(&self) -> Vec<(String, u32)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn observed_status(&self) -> Vec<WorkflowStatus> {
        self.recorder.seen.lock().unwrap().clone()
    }

    fn enter(&self, ctx: &ActivityContext, call: AppPlaneCall) -> Result<(), ActivityError> {
        self.recorder.snapshot();
        self.calls.lock().unwrap().push(call);
        self.attempts
            .lock()
            .unwrap()
            .push((ctx.idempotency_key.as_str().to_string(), ctx.attempt));
        match next_failure(&self.script) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn app_user_id(email: &str) -> String {
    format!("app-{}", email)
}

#[async_trait]
impl AppPlaneActivities for FakeAppPlane {
    async fn create_or_update_user(
        &self,
        ctx: &ActivityContext,
        request: &CreateOrUpdateUser,
    ) -> Result<UserProvisioned, ActivityError> {
        self.enter(ctx, AppPlaneCall::CreateOrUpdateUser(request.clone()))?;
        Ok(UserProvisioned {
            user_id: app_user_id(&request.email),
            created: true,
        })
    }

    async fn update_user_role(
        &self,
        ctx: &ActivityContext,
        request: &UpdateUserRole,
    ) -> Result<RoleUpdated, ActivityError> {
        self.enter(ctx, AppPlaneCall::UpdateUserRole(request.clone()))?;
        Ok(RoleUpdated {
            user_id: app_user_id(&request.email),
        })
    }

    async fn revoke_user_role(
        &self,
        ctx: &ActivityContext,
        request: &RevokeUserRole,
    ) -> Result<RoleRevoked, ActivityError> {
        self.enter(ctx, AppPlaneCall::RevokeUserRole(request.clone()))?;
        Ok(RoleRevoked {
            user_id: app_user_id(&request.email),
            deactivated: true,
        })
    }
}

#[derive(Default)]
pub struct FakeIdentityProvider {
    calls: Mutex<Vec<DeactivateUser>>,
    script: Mutex<Option<Script>>,
    reported_error: Mutex<Option<String>>,
    recorder: StatusRecorder,
}

impl FakeIdentityProvider {
    pub fn fail_always(&self, error: ActivityError) {
        *self.script.lock().unwrap() = Some(Script {
            remaining: u32::MAX,
            error,
        });
    }

    /// Answer with `success: false` and this error.
    pub fn report_failure(&self, error: &str) {
        *self.reported_error.lock().unwrap() = Some(error.to_string());
    }

    pub fn observe_status(&self, board: Arc<StatusBoard>, workflow_id: &str) {
        *self.recorder.target.lock().unwrap() = Some((board, workflow_id.to_string()));
    }

    pub fn calls(&self) -> Vec<DeactivateUser> {
        self.calls.lock().unwrap().clone()
    }

    pub fn observed_status(&self) -> Vec<WorkflowStatus> {
        self.recorder.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProviderActivities for FakeIdentityProvider {
    async fn deactivate_user(
        &self,
        _ctx: &ActivityContext,
        request: &DeactivateUser,
    ) -> Result<UserDeactivation, ActivityError> {
        self.recorder.snapshot();
        self.calls.lock().unwrap().push(request.clone());
        if let Some(error) = next_failure(&self.script) {
            return Err(error);
        }
        if let Some(error) = self.reported_error.lock().unwrap().clone() {
            return Ok(UserDeactivation {
                success: false,
                user_id: None,
                deactivated: false,
                error: Some(error),
            });
        }
        Ok(UserDeactivation {
            success: true,
            user_id: Some(format!("idp-{}", request.email)),
            deactivated: true,
            error: None,
        })
    }
}

/// Production presets with millisecond backoff so retries finish quickly.
pub fn fast_app_plane_options() -> ActivityOptions {
    ActivityOptions::new(
        policy::app_plane_retry_policy()
            .with_initial_interval(Duration::from_millis(1))
            .with_maximum_interval(Duration::from_millis(5)),
    )
    .with_start_to_close_timeout(Duration::from_secs(5))
}

pub fn fast_identity_provider_options() -> ActivityOptions {
    ActivityOptions::new(
        policy::identity_provider_retry_policy()
            .with_initial_interval(Duration::from_millis(1))
            .with_maximum_interval(Duration::from_millis(5)),
    )
    .with_start_to_close_timeout(Duration::from_secs(5))
}

pub struct Harness {
    pub persistence: Arc<SqlitePersistence>,
    pub board: Arc<StatusBoard>,
    pub engine: Engine,
    pub app_plane: Arc<FakeAppPlane>,
    pub identity_provider: Arc<FakeIdentityProvider>,
}

pub struct Run {
    pub workflow_id: String,
    pub instance_id: String,
    pub result: Result<SyncResult, ExecutionError<SyncError>>,
}

impl Harness {
    pub async fn new() -> Self {
        let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        Self::with_persistence(persistence)
    }

    pub fn with_persistence(persistence: Arc<SqlitePersistence>) -> Self {
        let app_plane = Arc::new(FakeAppPlane::default());
        let identity_provider = Arc::new(FakeIdentityProvider::default());
        let board = Arc::new(StatusBoard::new());

        let workflow = SyncUserRoleWorkflow::new(app_plane.clone(), identity_provider.clone())
            .with_app_plane_options(fast_app_plane_options())
            .with_identity_provider_options(fast_identity_provider_options());

        let engine = Engine::builder()
            .persistence(persistence.clone())
            .status_board(board.clone())
            .duplicate_policy(DuplicatePolicy::Reject)
            .register(workflow)
            .build()
            .unwrap();

        Self {
            persistence,
            board,
            engine,
            app_plane,
            identity_provider,
        }
    }

    pub async fn run(&self, input: SyncUserRoleInput) -> Run {
        let workflow_id = workflow_id_for(&input.tenant_id, &input.user_id);
        let tenant_id = input.tenant_id.clone();
        let handle = self
            .engine
            .start::<SyncUserRoleWorkflow>(&workflow_id, &tenant_id, input)
            .await
            .unwrap();
        let instance_id = handle.instance_id().to_string();
        Run {
            workflow_id,
            instance_id,
            result: handle.result().await,
        }
    }

    pub async fn wait_for_status(&self, workflow_id: &str, status: &str) {
        for _ in 0..500 {
            let current = self.engine.describe(workflow_id).await.unwrap();
            if current.is_some_and(|d| d.status == status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workflow {workflow_id} never reached status {status}");
    }

    /// Custom events stored for an instance as `(subtype, payload)`.
    pub async fn custom_events(&self, instance_id: &str) -> Vec<(String, Value)> {
        use planesync_sdk::Persistence;

        self.persistence
            .list_events(instance_id, Some("custom"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| {
                let payload = serde_json::from_slice(&e.payload.unwrap_or_default()).unwrap();
                (e.subtype.unwrap_or_default(), payload)
            })
            .collect()
    }
}

pub fn input(operation: &str) -> SyncUserRoleInput {
    SyncUserRoleInput {
        operation: operation.to_string(),
        tenant_id: "t1".to_string(),
        tenant_key: "acme".to_string(),
        user_id: "u1".to_string(),
        user_email: "a@b.com".to_string(),
        role_key: "admin".to_string(),
        performed_by: "p1".to_string(),
        ..Default::default()
    }
}

pub fn revoke_with_provider(kind: &str) -> SyncUserRoleInput {
    SyncUserRoleInput {
        identity_provider_kind: Some(kind.to_string()),
        ..input("revoke")
    }
}
