// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for planesync-core.
//!
//! This module defines the persistence abstraction and the SQLite backend.

pub mod sqlite;

pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;

/// Lifecycle status of an instance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Waiting for an in-flight instance of the same workflow id to finish.
    Queued,
    /// Created, not yet picked up.
    Pending,
    /// Workflow body is executing (or was, when the process died).
    Running,
    /// Finished with an output.
    Completed,
    /// Finished with an error.
    Failed,
}

impl InstanceStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the instance has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Instance record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstanceRecord {
    /// Unique identifier of this execution (run id).
    pub instance_id: String,
    /// Caller-chosen stable workflow identifier.
    pub workflow_id: String,
    /// Registered workflow type name.
    pub workflow_type: String,
    /// Tenant identifier for multi-tenancy isolation.
    pub tenant_id: String,
    /// Current status (queued, pending, running, completed, failed).
    pub status: String,
    /// Last checkpoint ID written by the instance.
    pub checkpoint_id: Option<String>,
    /// Serialized workflow input.
    pub input: Option<Vec<u8>>,
    /// Output data from successful completion.
    pub output: Option<Vec<u8>>,
    /// Error message from failure.
    pub error: Option<String>,
    /// Classification of the failure (e.g. `ValidationError`, `NotFound`).
    pub error_kind: Option<String>,
    /// Latest status projection published by the workflow.
    pub status_projection: Option<Vec<u8>>,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance finished.
    pub finished_at: Option<DateTime<Utc>>,
}

impl InstanceRecord {
    /// Typed view of [`InstanceRecord::status`].
    pub fn lifecycle(&self) -> Option<InstanceStatus> {
        InstanceStatus::parse(&self.status)
    }
}

/// Checkpoint record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckpointRecord {
    /// Database primary key.
    pub id: i64,
    /// Instance this checkpoint belongs to.
    pub instance_id: String,
    /// Unique checkpoint identifier within the instance.
    pub checkpoint_id: String,
    /// Serialized state data.
    pub state: Vec<u8>,
    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
}

/// Failed attempt stored by [`Persistence::save_retry_attempt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Error of the attempt, if one was recorded.
    pub error_message: Option<String>,
}

/// Event record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRecord {
    /// Database primary key (None when inserting new events).
    #[sqlx(default)]
    pub id: Option<i64>,
    /// Instance this event belongs to.
    pub instance_id: String,
    /// Type of event (started, completed, failed, custom).
    pub event_type: String,
    /// Associated checkpoint ID if applicable.
    pub checkpoint_id: Option<String>,
    /// Optional event payload data.
    pub payload: Option<Vec<u8>>,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
    /// Arbitrary subtype for custom events.
    pub subtype: Option<String>,
}

/// Persistence interface used by the engine and the SDK backend.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Create a `pending` instance holding its serialized input.
    ///
    /// Fails with [`CoreError::InstanceAlreadyRunning`] when another instance
    /// of the same `workflow_id` is still pending or running.
    async fn register_instance(
        &self,
        instance_id: &str,
        workflow_id: &str,
        workflow_type: &str,
        tenant_id: &str,
        input: &[u8],
    ) -> Result<(), CoreError>;

    /// Create a `queued` instance. Queued rows are not subject to the
    /// one-in-flight rule until they are moved to `running`.
    async fn enqueue_instance(
        &self,
        instance_id: &str,
        workflow_id: &str,
        workflow_type: &str,
        tenant_id: &str,
        input: &[u8],
    ) -> Result<(), CoreError>;

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError>;

    /// Most recently created instance for a workflow id, in any status.
    async fn latest_instance(&self, workflow_id: &str)
    -> Result<Option<InstanceRecord>, CoreError>;

    async fn update_instance_status(
        &self,
        instance_id: &str,
        status: &str,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError>;

    async fn update_instance_checkpoint(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
    ) -> Result<(), CoreError>;

    /// Replace the stored status projection of an instance.
    async fn save_status_projection(
        &self,
        instance_id: &str,
        projection: &[u8],
    ) -> Result<(), CoreError>;

    /// Move an instance to a terminal status, only if it is currently 'running'.
    ///
    /// Returns true if the update was applied, false if the instance had
    /// already been finished.
    async fn complete_instance_if_running(
        &self,
        instance_id: &str,
        status: &str,
        output: Option<&[u8]>,
        error: Option<&str>,
        error_kind: Option<&str>,
    ) -> Result<bool, CoreError>;

    async fn save_checkpoint(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
        state: &[u8],
    ) -> Result<(), CoreError>;

    async fn load_checkpoint(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointRecord>, CoreError>;

    /// All checkpoints of an instance in write order.
    async fn list_checkpoints(&self, instance_id: &str)
    -> Result<Vec<CheckpointRecord>, CoreError>;

    async fn insert_event(&self, event: &EventRecord) -> Result<(), CoreError>;

    /// Events of an instance in insertion order, optionally filtered by type.
    async fn list_events(
        &self,
        instance_id: &str,
        event_type: Option<&str>,
    ) -> Result<Vec<EventRecord>, CoreError>;

    /// Record a failed attempt as checkpoint `"{checkpoint_id}::retry::{attempt}"`.
    async fn save_retry_attempt(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
        attempt: i32,
        error_message: Option<&str>,
    ) -> Result<(), CoreError>;

    /// Failed attempts recorded for `checkpoint_id`, lowest attempt first.
    async fn list_retry_attempts(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<RetryAttemptRecord>, CoreError>;

    /// Queued, pending or running instances of a workflow type, oldest first.
    async fn list_recoverable_instances(
        &self,
        workflow_type: &str,
    ) -> Result<Vec<InstanceRecord>, CoreError>;

    async fn health_check_db(&self) -> Result<bool, CoreError>;

    async fn count_active_instances(&self) -> Result<i64, CoreError>;
}
