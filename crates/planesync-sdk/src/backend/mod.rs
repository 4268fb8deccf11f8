// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SDK backend implementations.
//!
//! The backend is the only way a running workflow touches durable state. The
//! `embedded` backend calls the persistence layer in-process.

pub mod embedded;

use async_trait::async_trait;
use planesync_core::RetryAttemptRecord;

use crate::error::Result;

/// Result of a checkpoint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointResult {
    /// Whether a checkpoint with this id already existed.
    pub found: bool,
    /// The stored state when `found`, empty otherwise.
    pub state: Vec<u8>,
}

impl CheckpointResult {
    /// Stored state if the checkpoint already existed (the resume case).
    pub fn existing_state(&self) -> Option<&[u8]> {
        self.found.then_some(self.state.as_slice())
    }
}

/// Backend trait for SDK operations on behalf of one instance.
#[async_trait]
pub trait SdkBackend: Send + Sync {
    /// Instance (run) id this backend acts for.
    fn instance_id(&self) -> &str;

    /// Workflow id of the instance.
    fn workflow_id(&self) -> &str;

    /// Tenant of the instance.
    fn tenant_id(&self) -> &str;

    /// Move the instance to `running`.
    async fn start(&self) -> Result<()>;

    /// Save `state` under `checkpoint_id`, or return what is already stored there.
    async fn checkpoint(&self, checkpoint_id: &str, state: &[u8]) -> Result<CheckpointResult>;

    /// Read a checkpoint without writing.
    async fn get_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Vec<u8>>>;

    /// Record a failed attempt that will be retried.
    async fn record_retry_attempt(
        &self,
        checkpoint_id: &str,
        attempt_number: u32,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Failed attempts already recorded for a step, lowest attempt first.
    async fn retry_attempts(&self, checkpoint_id: &str) -> Result<Vec<RetryAttemptRecord>>;

    /// Store a custom event with an opaque subtype.
    async fn send_custom_event(&self, subtype: &str, payload: Vec<u8>) -> Result<()>;

    /// Persist the latest status projection.
    async fn save_status(&self, projection: &[u8]) -> Result<()>;

    /// Finish the instance successfully. Returns false if it was already finished.
    async fn completed(&self, output: &[u8]) -> Result<bool>;

    /// Finish the instance with an error. Returns false if it was already finished.
    async fn failed(&self, error: &str, error_kind: &str) -> Result<bool>;
}
