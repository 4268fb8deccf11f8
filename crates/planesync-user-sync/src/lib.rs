// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cross-plane user-role synchronization.
//!
//! The Control Plane owns tenants, users and their roles. Every role change it
//! makes is replayed into the tenant's App Plane (and, on revocation, into the
//! external identity provider) by [`SyncUserRoleWorkflow`], a durable workflow
//! run by the `planesync-sdk` engine:
//!
//! 1. the request is validated ([`validation::validate`]) before any side effect
//! 2. the primary App Plane activity for the operation runs under the App Plane
//!    retry policy
//! 3. on revoke, the user is deactivated in the identity provider as a best
//!    effort compensating step
//! 4. a [`SyncResult`] is returned, or a [`SyncError`] whose kind tells
//!    validation failures apart from downstream failures
//!
//! Progress is published as a [`WorkflowStatus`] and can be read at any time
//! with [`get_status`].
//!
//! # Example
//!
//! ```ignore
//! use planesync_user_sync::{HttpAppPlaneClient, HttpIdentityProviderClient, SyncUserRoleWorkflow};
//!
//! let workflow = SyncUserRoleWorkflow::new(
//!     Arc::new(HttpAppPlaneClient::new(&ClientSettings::new(app_plane_url))?),
//!     Arc::new(HttpIdentityProviderClient::new(&ClientSettings::new(idp_url))?),
//! );
//! let engine = Engine::builder().persistence(persistence).register(workflow).build()?;
//!
//! let workflow_id = workflow_id_for(&input.tenant_id, &input.user_id);
//! let handle = engine
//!     .start::<SyncUserRoleWorkflow>(&workflow_id, &input.tenant_id.clone(), input)
//!     .await?;
//! ```

pub mod activities;
pub mod clients;
pub mod error;
pub mod policy;
pub mod status;
pub mod types;
pub mod validation;
pub mod workflow;

pub use activities::{AppPlaneActivities, IdentityProviderActivities};
pub use clients::{ClientError, ClientSettings, HttpAppPlaneClient, HttpIdentityProviderClient};
pub use error::SyncError;
pub use policy::IdentityProviderKind;
pub use status::{StatusTracker, SyncStep, WorkflowStatus, get_status};
pub use types::{Operation, RoleChange, Scope, ScopeType, SyncRequest, SyncResult, SyncUserRoleInput};
pub use validation::{ValidationFailure, validate};
pub use workflow::{
    COMPENSATION_FAILED_EVENT, CompensationFailed, SyncUserRoleWorkflow, WORKFLOW_TYPE,
    workflow_id_for,
};
