// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded SDK backend for direct database access.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use planesync_core::persistence::{EventRecord, Persistence, RetryAttemptRecord};
use tracing::{debug, info, instrument, warn};

use super::{CheckpointResult, SdkBackend};
use crate::error::{Result, SdkError};

/// Backend that talks to the persistence layer in the same process.
pub struct EmbeddedBackend {
    persistence: Arc<dyn Persistence>,
    instance_id: String,
    workflow_id: String,
    tenant_id: String,
}

impl EmbeddedBackend {
    /// Create a backend for an instance that is already registered.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        instance_id: impl Into<String>,
        workflow_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            persistence,
            instance_id: instance_id.into(),
            workflow_id: workflow_id.into(),
            tenant_id: tenant_id.into(),
        }
    }

    fn event(&self, event_type: &str, payload: Option<Vec<u8>>, subtype: Option<&str>) -> EventRecord {
        EventRecord {
            id: None,
            instance_id: self.instance_id.clone(),
            event_type: event_type.to_string(),
            checkpoint_id: None,
            payload,
            created_at: Utc::now(),
            subtype: subtype.map(str::to_string),
        }
    }
}

impl std::fmt::Debug for EmbeddedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedBackend")
            .field("instance_id", &self.instance_id)
            .field("workflow_id", &self.workflow_id)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

#[async_trait]
impl SdkBackend for EmbeddedBackend {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id, workflow_id = %self.workflow_id))]
    async fn start(&self) -> Result<()> {
        self.persistence
            .update_instance_status(&self.instance_id, "running", Some(Utc::now()))
            .await?;

        self.persistence
            .insert_event(&self.event("started", None, None))
            .await
            .map_err(|e| SdkError::Event(e.to_string()))?;

        info!("Instance started (embedded)");
        Ok(())
    }

    #[instrument(skip(self, state), fields(instance_id = %self.instance_id, checkpoint_id = %checkpoint_id, state_size = state.len()))]
    async fn checkpoint(&self, checkpoint_id: &str, state: &[u8]) -> Result<CheckpointResult> {
        let existing = self
            .persistence
            .load_checkpoint(&self.instance_id, checkpoint_id)
            .await
            .map_err(|e| SdkError::Checkpoint(e.to_string()))?;

        if let Some(checkpoint) = existing {
            debug!(checkpoint_id = %checkpoint_id, "Found existing checkpoint - returning for resume");
            return Ok(CheckpointResult {
                found: true,
                state: checkpoint.state,
            });
        }

        self.persistence
            .save_checkpoint(&self.instance_id, checkpoint_id, state)
            .await
            .map_err(|e| SdkError::Checkpoint(e.to_string()))?;

        self.persistence
            .update_instance_checkpoint(&self.instance_id, checkpoint_id)
            .await
            .map_err(|e| SdkError::Checkpoint(e.to_string()))?;

        debug!(checkpoint_id = %checkpoint_id, "New checkpoint saved");

        Ok(CheckpointResult {
            found: false,
            state: Vec::new(),
        })
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id, checkpoint_id = %checkpoint_id))]
    async fn get_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .persistence
            .load_checkpoint(&self.instance_id, checkpoint_id)
            .await
            .map_err(|e| SdkError::Checkpoint(e.to_string()))?;

        Ok(result.map(|c| c.state))
    }

    #[instrument(skip(self, error_message), fields(instance_id = %self.instance_id, checkpoint_id = %checkpoint_id, attempt = attempt_number))]
    async fn record_retry_attempt(
        &self,
        checkpoint_id: &str,
        attempt_number: u32,
        error_message: Option<&str>,
    ) -> Result<()> {
        let attempt = i32::try_from(attempt_number).unwrap_or(i32::MAX);
        self.persistence
            .save_retry_attempt(&self.instance_id, checkpoint_id, attempt, error_message)
            .await
            .map_err(|e| SdkError::Checkpoint(e.to_string()))?;

        debug!("Retry attempt recorded");
        Ok(())
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id, checkpoint_id = %checkpoint_id))]
    async fn retry_attempts(&self, checkpoint_id: &str) -> Result<Vec<RetryAttemptRecord>> {
        self.persistence
            .list_retry_attempts(&self.instance_id, checkpoint_id)
            .await
            .map_err(|e| SdkError::Checkpoint(e.to_string()))
    }

    #[instrument(skip(self, payload), fields(instance_id = %self.instance_id, subtype = %subtype))]
    async fn send_custom_event(&self, subtype: &str, payload: Vec<u8>) -> Result<()> {
        self.persistence
            .insert_event(&self.event("custom", Some(payload), Some(subtype)))
            .await
            .map_err(|e| SdkError::Event(e.to_string()))?;

        debug!("Custom event recorded");
        Ok(())
    }

    async fn save_status(&self, projection: &[u8]) -> Result<()> {
        self.persistence
            .save_status_projection(&self.instance_id, projection)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, output), fields(instance_id = %self.instance_id, output_size = output.len()))]
    async fn completed(&self, output: &[u8]) -> Result<bool> {
        let applied = self
            .persistence
            .complete_instance_if_running(&self.instance_id, "completed", Some(output), None, None)
            .await?;

        if !applied {
            warn!("Instance was no longer running; completion not recorded");
            return Ok(false);
        }

        self.persistence
            .insert_event(&self.event("completed", Some(output.to_vec()), None))
            .await
            .map_err(|e| SdkError::Event(e.to_string()))?;

        info!("Instance completed");
        Ok(true)
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    async fn failed(&self, error: &str, error_kind: &str) -> Result<bool> {
        let applied = self
            .persistence
            .complete_instance_if_running(
                &self.instance_id,
                "failed",
                None,
                Some(error),
                Some(error_kind),
            )
            .await?;

        if !applied {
            warn!("Instance was no longer running; failure not recorded");
            return Ok(false);
        }

        self.persistence
            .insert_event(&self.event("failed", Some(error.as_bytes().to_vec()), Some(error_kind)))
            .await
            .map_err(|e| SdkError::Event(e.to_string()))?;

        info!(error = %error, error_kind = %error_kind, "Instance failed");
        Ok(true)
    }
}
