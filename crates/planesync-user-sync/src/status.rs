// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status projection of a running synchronization.

use planesync_sdk::{Engine, SdkError, WorkflowContext};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Validating,
    SyncingUser,
    SyncingRole,
    Completed,
    Failed,
}

impl SyncStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What a status query returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    pub step: SyncStep,
    pub progress_percent: u8,
    /// `None` while the submitted operation has not been recognised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    pub message: String,
}

impl WorkflowStatus {
    pub fn initial(operation: Option<Operation>) -> Self {
        Self {
            step: SyncStep::Validating,
            progress_percent: 0,
            operation,
            message: "Validating sync request".to_string(),
        }
    }
}

/// Single writer of the status projection for one instance.
///
/// Progress never goes down and a terminal step is never overwritten.
pub struct StatusTracker<'a> {
    ctx: &'a WorkflowContext,
    current: WorkflowStatus,
}

impl<'a> StatusTracker<'a> {
    /// Publish the initial `Validating` status.
    pub async fn start(
        ctx: &'a WorkflowContext,
        operation: Option<Operation>,
    ) -> Result<Self, SdkError> {
        let tracker = Self {
            ctx,
            current: WorkflowStatus::initial(operation),
        };
        ctx.set_status(&tracker.current).await?;
        Ok(tracker)
    }

    pub fn current(&self) -> &WorkflowStatus {
        &self.current
    }

    /// Move to `step` and publish. The tracker keeps its previous status if
    /// the new one could not be stored.
    pub async fn advance(
        &mut self,
        step: SyncStep,
        progress_percent: u8,
        message: impl Into<String>,
    ) -> Result<(), SdkError> {
        if self.current.step.is_terminal() {
            return Ok(());
        }
        let next = WorkflowStatus {
            step,
            progress_percent: progress_percent.min(100).max(self.current.progress_percent),
            operation: self.current.operation,
            message: message.into(),
        };
        self.ctx.set_status(&next).await?;
        self.current = next;
        Ok(())
    }

    pub async fn complete(&mut self, message: impl Into<String>) -> Result<(), SdkError> {
        self.advance(SyncStep::Completed, 100, message).await
    }

    /// Freeze the projection at `Failed`. Storage errors are logged, not
    /// returned, so they cannot mask the failure being reported.
    pub async fn fail(&mut self, message: impl Into<String>) {
        let progress = self.current.progress_percent;
        if let Err(e) = self.advance(SyncStep::Failed, progress, message).await {
            warn!(error = %e, "Failed to publish final status");
        }
    }
}

/// Latest status of the synchronization running (or last run) under `workflow_id`.
pub async fn get_status(engine: &Engine, workflow_id: &str) -> Result<Option<WorkflowStatus>, SdkError> {
    engine
        .query_status(workflow_id)
        .await?
        .map(serde_json::from_value)
        .transpose()
        .map_err(Into::into)
}
