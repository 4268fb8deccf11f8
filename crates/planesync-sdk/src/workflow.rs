// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The workflow authoring contract.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::WorkflowContext;

/// A workflow error that carries a failure kind.
///
/// The kind is stored with the failed instance so callers can tell, for
/// example, a validation failure from an exhausted downstream call.
pub trait WorkflowError: std::error::Error + Send + Sync + 'static {
    /// Failure classification (`ValidationError`, `NotFound`, ...).
    fn kind(&self) -> &str;

    /// Whether resubmitting the same input could succeed.
    fn is_retryable(&self) -> bool {
        false
    }
}

/// A durable workflow.
///
/// `run` must be deterministic with respect to its input and the results it
/// gets back from the context: no wall-clock reads, no randomness, no I/O
/// outside of [`WorkflowContext::activity`]. The engine may execute the body
/// again after a crash, and recorded activity outcomes are then replayed in
/// call order.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Registered type name, stored with every instance.
    const NAME: &'static str;

    /// Workflow input.
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Successful result.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Failure type.
    type Error: WorkflowError;

    /// Execute the workflow body.
    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Result<Self::Output, Self::Error>;
}
