// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Side-effecting operations against the App Plane and the identity provider.
//!
//! # Contract
//!
//! Every method may be called more than once for the same logical step: after a
//! retryable failure, after a timed-out attempt whose effect may still have
//! landed, and after a crash between the effect and its recorded outcome. An
//! implementation must make a repeated call with the same
//! [`ActivityContext::idempotency_key`] converge on the same end state:
//!
//! - `create_or_update_user` upserts; an existing user keeps its id and gets the role
//! - `update_user_role` sets the role to `new_role` whatever the current role is
//! - `revoke_user_role` succeeds if the binding is already gone
//! - `deactivate_user` succeeds if the user is already inactive
//!
//! Failures must be classified with a kind from [`planesync_sdk::kinds`]; the
//! kind alone decides whether the call is retried.
//!
//! Activities know nothing about the workflow that calls them.

use async_trait::async_trait;
use planesync_sdk::{ActivityContext, ActivityError};
use serde::{Deserialize, Serialize};

use crate::types::ScopeType;

/// Activity names, used in checkpoint ids and idempotency keys.
pub mod names {
    pub const CREATE_OR_UPDATE_USER: &str = "app-plane.create-or-update-user";
    pub const UPDATE_USER_ROLE: &str = "app-plane.update-user-role";
    pub const REVOKE_USER_ROLE: &str = "app-plane.revoke-user-role";
    pub const DEACTIVATE_IDP_USER: &str = "identity-provider.deactivate-user";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrUpdateUser {
    pub tenant_id: String,
    pub tenant_key: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider_user_id: Option<String>,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_type: Option<ScopeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub invited_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProvisioned {
    pub user_id: String,
    /// False when the user already existed and was only updated.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRole {
    pub tenant_id: String,
    pub email: String,
    pub new_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUpdated {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeUserRole {
    pub tenant_id: String,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRevoked {
    pub user_id: String,
    /// True when the App Plane membership was deactivated as a result.
    pub deactivated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateUser {
    pub tenant_id: String,
    pub tenant_key: String,
    pub provider: String,
    pub email: String,
}

/// Outcome reported by the identity provider integration.
///
/// `success: false` is a handled failure on the provider side; the call itself
/// went through and is not retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeactivation {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub deactivated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// App Plane user and role-binding operations.
#[async_trait]
pub trait AppPlaneActivities: Send + Sync {
    /// Create the user if missing and bind `role`.
    async fn create_or_update_user(
        &self,
        ctx: &ActivityContext,
        request: &CreateOrUpdateUser,
    ) -> Result<UserProvisioned, ActivityError>;

    /// Replace the user's role with `new_role`.
    async fn update_user_role(
        &self,
        ctx: &ActivityContext,
        request: &UpdateUserRole,
    ) -> Result<RoleUpdated, ActivityError>;

    /// Remove the `role` binding, deactivating the membership when nothing is left.
    async fn revoke_user_role(
        &self,
        ctx: &ActivityContext,
        request: &RevokeUserRole,
    ) -> Result<RoleRevoked, ActivityError>;
}

/// Identity provider operations.
#[async_trait]
pub trait IdentityProviderActivities: Send + Sync {
    /// Disable the user's login in the given provider.
    async fn deactivate_user(
        &self,
        ctx: &ActivityContext,
        request: &DeactivateUser,
    ) -> Result<UserDeactivation, ActivityError>;
}
