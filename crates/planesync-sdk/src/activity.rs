// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Activity types: classified failures, per-call options and the context handed
//! to every attempt.
//!
//! # Idempotency contract
//!
//! The proxy may invoke an activity more than once for the same logical step:
//! after a retryable failure, after a timeout whose side effect may still have
//! landed, or after a crash that happened between the side effect and the
//! recorded outcome. Implementations must therefore be safe to re-apply. Every
//! attempt of one step carries the same [`IdempotencyKey`]; forward it to the
//! remote system whenever it supports deduplication.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SdkError;
use crate::retry::RetryPolicy;

/// Well-known failure kinds.
pub mod kinds {
    /// The remote resource (tenant, user, role) does not exist.
    pub const NOT_FOUND: &str = "NotFound";
    /// The remote system rejected the request as malformed.
    pub const VALIDATION_ERROR: &str = "ValidationError";
    /// The caller is not allowed to perform the operation.
    pub const PERMISSION_DENIED: &str = "PermissionDenied";
    /// Network error or 5xx response.
    pub const TRANSIENT: &str = "Transient";
    /// The remote system asked us to slow down.
    pub const RATE_LIMITED: &str = "RateLimited";
    /// Concurrent modification on the remote side.
    pub const CONFLICT: &str = "Conflict";
    /// The attempt exceeded its start-to-close timeout.
    pub const TIMEOUT: &str = "Timeout";
    /// The response could not be understood.
    pub const INVALID_RESPONSE: &str = "InvalidResponse";
    /// The durable runtime itself failed (storage, serialization).
    pub const RUNTIME: &str = "RuntimeError";
}

/// A classified activity failure.
///
/// `kind` drives the retry decision; `message` is for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct ActivityError {
    /// Failure classification, matched against `non_retryable_error_kinds`.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
    /// HTTP status of the remote response, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ActivityError {
    /// Create a failure with an arbitrary kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            status_code: None,
        }
    }

    /// Attach the HTTP status that produced this failure.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(kinds::NOT_FOUND, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(kinds::VALIDATION_ERROR, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(kinds::PERMISSION_DENIED, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(kinds::TRANSIENT, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(kinds::TIMEOUT, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(kinds::INVALID_RESPONSE, message)
    }

    /// Whether the failure kind equals `kind`.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

impl From<SdkError> for ActivityError {
    fn from(err: SdkError) -> Self {
        Self::new(kinds::RUNTIME, err.to_string())
    }
}

/// Options for one activity call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    /// Retry policy applied across attempts.
    pub retry: RetryPolicy,
    /// Upper bound for a single attempt. `None` waits indefinitely.
    pub start_to_close_timeout: Option<Duration>,
}

impl ActivityOptions {
    /// Options with the given retry policy and no timeout.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            start_to_close_timeout: None,
        }
    }

    /// Bound each attempt by `timeout`.
    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = Some(timeout);
        self
    }
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Stable key for one logical activity step of one instance.
///
/// Format: `{instance_id}/{sequence}/{activity}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Build the key for the `sequence`-th activity call of an instance.
    pub fn new(instance_id: &str, sequence: u32, activity: &str) -> Self {
        Self(format!("{}/{}/{}", instance_id, sequence, activity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Information passed to each activity attempt.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Activity name as given to the proxy.
    pub activity: String,
    /// Same value for every attempt of this step.
    pub idempotency_key: IdempotencyKey,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Tenant of the owning instance.
    pub tenant_id: String,
}

/// Outcome of an activity step as stored in its checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordedOutcome<T> {
    /// The activity returned a value.
    Completed {
        /// Returned value.
        value: T,
    },
    /// The activity failed for good (non-retryable or retries exhausted).
    Failed {
        /// Final failure.
        error: ActivityError,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl<T> RecordedOutcome<T> {
    /// Convert back to the result the proxy originally returned.
    pub fn into_result(self) -> Result<T, ActivityError> {
        match self {
            Self::Completed { value } => Ok(value),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_error_display_and_kind() {
        let err = ActivityError::not_found("tenant t1 not found").with_status(404);
        assert_eq!(err.to_string(), "NotFound: tenant t1 not found");
        assert!(err.is_kind(kinds::NOT_FOUND));
        assert_eq!(err.status_code, Some(404));
    }

    #[test]
    fn test_sdk_error_becomes_runtime_failure() {
        let err: ActivityError = SdkError::Checkpoint("disk full".to_string()).into();
        assert_eq!(err.kind, kinds::RUNTIME);
        assert!(err.message.contains("disk full"));
    }

    #[test]
    fn test_idempotency_key_format() {
        let key = IdempotencyKey::new("run-1", 2, "revoke_user_role");
        assert_eq!(key.as_str(), "run-1/2/revoke_user_role");
        assert_eq!(key.to_string(), "run-1/2/revoke_user_role");
    }

    #[test]
    fn test_recorded_outcome_wire_shape() {
        let ok: RecordedOutcome<u32> = RecordedOutcome::Completed { value: 7 };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "completed", "value": 7}));

        let failed: RecordedOutcome<u32> = RecordedOutcome::Failed {
            error: ActivityError::transient("connection reset"),
            attempts: 5,
        };
        let json = serde_json::to_string(&failed).unwrap();
        let back: RecordedOutcome<u32> = serde_json::from_str(&json).unwrap();
        let err = back.into_result().unwrap_err();
        assert_eq!(err.kind, kinds::TRANSIENT);
    }
}
