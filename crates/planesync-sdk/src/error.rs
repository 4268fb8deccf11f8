// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SDK-specific error types.

use planesync_core::CoreError;
use thiserror::Error;

/// Errors that can occur in the SDK and the embedded engine.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Configuration error (missing builder field, invalid policy)
    #[error("configuration error: {0}")]
    Config(String),

    /// A workflow with this id is already pending or running
    #[error("workflow '{workflow_id}' already has an instance in flight")]
    AlreadyRunning {
        /// The conflicting workflow id
        workflow_id: String,
    },

    /// No workflow registered under this type name
    #[error("unknown workflow type: {0}")]
    UnknownWorkflow(String),

    /// Workflow id or instance not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Checkpoint operation failed
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Event recording failed
    #[error("event error: {0}")]
    Event(String),

    /// The engine is shutting down and accepts no more work
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal SDK error
    #[error("internal error: {0}")]
    Internal(String),
}

impl SdkError {
    /// Stable machine-readable code, in the same style as core error codes.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::AlreadyRunning { .. } => "INSTANCE_ALREADY_RUNNING",
            Self::UnknownWorkflow(_) => "UNKNOWN_WORKFLOW",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Checkpoint(_) => "CHECKPOINT_FAILED",
            Self::Event(_) => "EVENT_FAILED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<CoreError> for SdkError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InstanceAlreadyRunning { workflow_id } => {
                SdkError::AlreadyRunning { workflow_id }
            }
            CoreError::InstanceNotFound { instance_id } => SdkError::NotFound(instance_id),
            CoreError::CheckpointSaveFailed { .. } => SdkError::Checkpoint(err.to_string()),
            other => SdkError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Serialization(err.to_string())
    }
}

/// Type alias for SDK results.
pub type Result<T> = std::result::Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_conversion() {
        let err: SdkError = CoreError::InstanceAlreadyRunning {
            workflow_id: "wf-1".to_string(),
        }
        .into();
        assert!(matches!(err, SdkError::AlreadyRunning { ref workflow_id } if workflow_id == "wf-1"));
        assert_eq!(err.error_code(), "INSTANCE_ALREADY_RUNNING");

        let err: SdkError = CoreError::DatabaseError {
            operation: "query".to_string(),
            details: "locked".to_string(),
        }
        .into();
        assert!(matches!(err, SdkError::Internal(_)));
        assert!(err.to_string().contains("locked"));
    }
}
