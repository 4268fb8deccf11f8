// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The user-role synchronization workflow.
//!
//! ```text
//!                   ┌──────────── any error ─────────────┐
//!                   │                                    ▼
//! Validating(0) → SyncingUser(20) → SyncingRole(50) ─→ Completed(100)     Failed
//!                                        │                  ▲
//!                                        └─ revoke + IdP ─→ SyncingRole(75)
//! ```
//!
//! | Operation | Primary activity | Compensating activity |
//! |-----------|------------------|-----------------------|
//! | assign | create-or-update user with role | - |
//! | update | update user role (previous → new) | - |
//! | revoke | revoke role | deactivate user in IdP, when a supported kind is given |
//!
//! The compensating deactivation is best effort. It runs only after the
//! revocation succeeded, and when it fails the revocation still stands: the
//! request reports success, a warning is logged and a `compensation_failed`
//! event is stored for the instance. Until someone acts on that event the user
//! keeps an active IdP login without any App Plane role.

use std::sync::Arc;

use async_trait::async_trait;
use planesync_sdk::{ActivityOptions, Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::activities::{
    AppPlaneActivities, CreateOrUpdateUser, DeactivateUser, IdentityProviderActivities,
    RevokeUserRole, RoleRevoked, RoleUpdated, UpdateUserRole, UserProvisioned, names,
};
use crate::error::SyncError;
use crate::policy::{self, IdentityProviderKind};
use crate::status::{StatusTracker, SyncStep};
use crate::types::{Operation, RoleChange, SyncRequest, SyncResult, SyncUserRoleInput};

/// Registered workflow type name.
pub const WORKFLOW_TYPE: &str = "user-role-sync";

/// Subtype of the event stored when the IdP deactivation fails.
pub const COMPENSATION_FAILED_EVENT: &str = "compensation_failed";

/// Workflow id for a user of a tenant.
///
/// Deriving it from `(tenant_id, user_id)` is what serializes concurrent
/// changes to the same user: the engine keeps one instance per id in flight.
pub fn workflow_id_for(tenant_id: &str, user_id: &str) -> String {
    format!("{}:{}:{}", WORKFLOW_TYPE, tenant_id, user_id)
}

/// Payload of a [`COMPENSATION_FAILED_EVENT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationFailed {
    pub tenant_id: String,
    pub user_id: String,
    pub email: String,
    pub provider: String,
    pub error: String,
}

/// Keeps a user's App Plane role (and IdP status on revoke) in line with the
/// Control Plane.
#[derive(Clone)]
pub struct SyncUserRoleWorkflow {
    app_plane: Arc<dyn AppPlaneActivities>,
    identity_provider: Arc<dyn IdentityProviderActivities>,
    app_plane_options: ActivityOptions,
    identity_provider_options: ActivityOptions,
}

impl std::fmt::Debug for SyncUserRoleWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncUserRoleWorkflow")
            .field("app_plane_options", &self.app_plane_options)
            .field("identity_provider_options", &self.identity_provider_options)
            .finish()
    }
}

impl SyncUserRoleWorkflow {
    /// Workflow using the default retry presets.
    pub fn new(
        app_plane: Arc<dyn AppPlaneActivities>,
        identity_provider: Arc<dyn IdentityProviderActivities>,
    ) -> Self {
        Self {
            app_plane,
            identity_provider,
            app_plane_options: policy::app_plane_activity_options(),
            identity_provider_options: policy::identity_provider_activity_options(),
        }
    }

    pub fn with_app_plane_options(mut self, options: ActivityOptions) -> Self {
        self.app_plane_options = options;
        self
    }

    pub fn with_identity_provider_options(mut self, options: ActivityOptions) -> Self {
        self.identity_provider_options = options;
        self
    }

    async fn sync(
        &self,
        ctx: &WorkflowContext,
        status: &mut StatusTracker<'_>,
        input: &SyncUserRoleInput,
    ) -> Result<SyncResult, SyncError> {
        let request = SyncRequest::parse(input)?;
        let operation = request.operation();

        status
            .advance(
                SyncStep::SyncingUser,
                20,
                format!("Syncing user {} to the App Plane", request.user_email),
            )
            .await?;

        let app_plane_user_id = match &request.change {
            RoleChange::Assign => {
                let provisioned = self.create_or_update_user(ctx, &request).await?;
                status
                    .advance(
                        SyncStep::SyncingRole,
                        50,
                        format!("Role '{}' assigned", request.role_key),
                    )
                    .await?;
                provisioned.user_id
            }
            RoleChange::Update { previous_role_key } => {
                let updated = self
                    .update_user_role(ctx, &request, previous_role_key.clone())
                    .await?;
                status
                    .advance(
                        SyncStep::SyncingRole,
                        50,
                        format!("Role changed to '{}'", request.role_key),
                    )
                    .await?;
                updated.user_id
            }
            RoleChange::Revoke {
                identity_provider_kind,
            } => {
                let revoked = self.revoke_user_role(ctx, &request).await?;
                status
                    .advance(
                        SyncStep::SyncingRole,
                        50,
                        format!("Role '{}' revoked", request.role_key),
                    )
                    .await?;
                if let Some(kind) = identity_provider_kind {
                    self.deactivate_in_identity_provider(ctx, status, &request, kind)
                        .await?;
                }
                revoked.user_id
            }
        };

        status
            .complete(format!(
                "{} of role '{}' for {} completed",
                operation, request.role_key, request.user_email
            ))
            .await?;

        info!(
            operation = %operation,
            tenant_id = %request.tenant_id,
            user_id = %request.user_id,
            role_key = %request.role_key,
            app_plane_user_id = %app_plane_user_id,
            "User role synchronized"
        );

        Ok(SyncResult {
            success: true,
            operation,
            tenant_id: request.tenant_id,
            user_id: request.user_id,
            role_key: request.role_key,
            app_plane_user_id: Some(app_plane_user_id),
            error: None,
        })
    }

    // ========== Primary activities ==========

    async fn create_or_update_user(
        &self,
        ctx: &WorkflowContext,
        request: &SyncRequest,
    ) -> Result<UserProvisioned, SyncError> {
        let command = CreateOrUpdateUser {
            tenant_id: request.tenant_id.clone(),
            tenant_key: request.tenant_key.clone(),
            email: request.user_email.clone(),
            first_name: request.first_name.clone(),
            last_name: request.last_name.clone(),
            identity_provider_user_id: request.identity_provider_user_id.clone(),
            role: request.role_key.clone(),
            scope_type: request.scope.as_ref().map(|s| s.scope_type),
            scope_id: request.scope.as_ref().and_then(|s| s.scope_id.clone()),
            invited_by: request.performed_by.clone(),
        };
        let app_plane = &self.app_plane;
        let command = &command;

        ctx.activity(
            names::CREATE_OR_UPDATE_USER,
            &self.app_plane_options,
            move |attempt| async move { app_plane.create_or_update_user(&attempt, command).await },
        )
        .await
        .map_err(|e| SyncError::activity(names::CREATE_OR_UPDATE_USER, e))
    }

    async fn update_user_role(
        &self,
        ctx: &WorkflowContext,
        request: &SyncRequest,
        previous_role: Option<String>,
    ) -> Result<RoleUpdated, SyncError> {
        let command = UpdateUserRole {
            tenant_id: request.tenant_id.clone(),
            email: request.user_email.clone(),
            new_role: request.role_key.clone(),
            previous_role,
        };
        let app_plane = &self.app_plane;
        let command = &command;

        ctx.activity(
            names::UPDATE_USER_ROLE,
            &self.app_plane_options,
            move |attempt| async move { app_plane.update_user_role(&attempt, command).await },
        )
        .await
        .map_err(|e| SyncError::activity(names::UPDATE_USER_ROLE, e))
    }

    async fn revoke_user_role(
        &self,
        ctx: &WorkflowContext,
        request: &SyncRequest,
    ) -> Result<RoleRevoked, SyncError> {
        let command = RevokeUserRole {
            tenant_id: request.tenant_id.clone(),
            email: request.user_email.clone(),
            role: request.role_key.clone(),
        };
        let app_plane = &self.app_plane;
        let command = &command;

        ctx.activity(
            names::REVOKE_USER_ROLE,
            &self.app_plane_options,
            move |attempt| async move { app_plane.revoke_user_role(&attempt, command).await },
        )
        .await
        .map_err(|e| SyncError::activity(names::REVOKE_USER_ROLE, e))
    }

    // ========== Compensation ==========

    async fn deactivate_in_identity_provider(
        &self,
        ctx: &WorkflowContext,
        status: &mut StatusTracker<'_>,
        request: &SyncRequest,
        kind: &str,
    ) -> Result<(), SyncError> {
        let Some(provider) = IdentityProviderKind::parse(kind) else {
            info!(provider = %kind, "Identity provider kind not supported, skipping deactivation");
            return Ok(());
        };

        status
            .advance(
                SyncStep::SyncingRole,
                75,
                format!("Deactivating user in {}", provider),
            )
            .await?;

        let command = DeactivateUser {
            tenant_id: request.tenant_id.clone(),
            tenant_key: request.tenant_key.clone(),
            provider: provider.as_str().to_string(),
            email: request.user_email.clone(),
        };
        let identity_provider = &self.identity_provider;
        let command_ref = &command;

        let outcome = ctx
            .activity(
                names::DEACTIVATE_IDP_USER,
                &self.identity_provider_options,
                move |attempt| async move {
                    identity_provider.deactivate_user(&attempt, command_ref).await
                },
            )
            .await;

        let failure = match outcome {
            Ok(deactivation) if deactivation.success => {
                info!(
                    provider = %provider,
                    deactivated = deactivation.deactivated,
                    "User deactivated in identity provider"
                );
                return Ok(());
            }
            Ok(deactivation) => deactivation
                .error
                .unwrap_or_else(|| "identity provider reported failure".to_string()),
            Err(e) => e.to_string(),
        };

        warn!(
            provider = %provider,
            tenant_id = %request.tenant_id,
            user_id = %request.user_id,
            error = %failure,
            "Identity provider deactivation failed; App Plane revocation stands"
        );

        let event = CompensationFailed {
            tenant_id: command.tenant_id,
            user_id: request.user_id.clone(),
            email: command.email,
            provider: command.provider,
            error: failure,
        };
        if let Err(e) = ctx.custom_event(COMPENSATION_FAILED_EVENT, &event).await {
            error!(error = %e, "Failed to record compensation failure event");
        }
        Ok(())
    }
}

#[async_trait]
impl Workflow for SyncUserRoleWorkflow {
    const NAME: &'static str = WORKFLOW_TYPE;
    type Input = SyncUserRoleInput;
    type Output = SyncResult;
    type Error = SyncError;

    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: SyncUserRoleInput,
    ) -> Result<SyncResult, SyncError> {
        let mut status = StatusTracker::start(ctx, Operation::parse(&input.operation)).await?;

        match self.sync(ctx, &mut status, &input).await {
            Ok(result) => Ok(result),
            Err(err) => {
                error!(
                    operation = %input.operation,
                    tenant_id = %input.tenant_id,
                    user_id = %input.user_id,
                    error = %err,
                    "User role synchronization failed"
                );
                status.fail(err.to_string()).await;
                Err(err)
            }
        }
    }
}
