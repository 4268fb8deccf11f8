// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow-level failure of a synchronization.

use planesync_sdk::{ActivityError, SdkError, WorkflowError, kinds};
use thiserror::Error;

use crate::policy;
use crate::validation::ValidationFailure;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The request was rejected before any side effect.
    #[error("invalid sync request: {0}")]
    Validation(#[from] ValidationFailure),

    /// A primary activity failed for good.
    #[error("{activity} failed: {source}")]
    Activity {
        activity: &'static str,
        #[source]
        source: ActivityError,
    },

    /// The durable runtime could not record progress.
    #[error("runtime error: {0}")]
    Runtime(#[from] SdkError),
}

impl SyncError {
    pub fn activity(activity: &'static str, source: ActivityError) -> Self {
        Self::Activity { activity, source }
    }
}

impl WorkflowError for SyncError {
    fn kind(&self) -> &str {
        match self {
            Self::Validation(_) => ValidationFailure::KIND,
            Self::Activity { source, .. } => &source.kind,
            Self::Runtime(_) => kinds::RUNTIME,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Activity { source, .. } => !policy::is_non_retryable(&source.kind),
            Self::Runtime(_) => true,
        }
    }
}
