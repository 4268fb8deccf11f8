// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Input validation.
//!
//! Runs inside the workflow body, so it must stay pure: same input, same answer,
//! on every replay.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::types::{Operation, SyncUserRoleInput};

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

/// First reason a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("invalid operation '{0}': expected assign, update or revoke")]
    InvalidOperation(String),

    #[error("tenantId is required")]
    MissingTenantId,

    #[error("tenantKey is required")]
    MissingTenantKey,

    #[error("userId is required")]
    MissingUserId,

    #[error("userEmail '{0}' is not a valid email address")]
    InvalidEmail(String),

    #[error("roleKey is required")]
    MissingRoleKey,

    #[error("performedBy is required")]
    MissingPerformedBy,
}

impl ValidationFailure {
    /// Failure kind reported for every validation error.
    pub const KIND: &'static str = planesync_sdk::kinds::VALIDATION_ERROR;

    /// Wire name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::InvalidOperation(_) => "operation",
            Self::MissingTenantId => "tenantId",
            Self::MissingTenantKey => "tenantKey",
            Self::MissingUserId => "userId",
            Self::InvalidEmail(_) => "userEmail",
            Self::MissingRoleKey => "roleKey",
            Self::MissingPerformedBy => "performedBy",
        }
    }
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Check a request, stopping at the first violation.
pub fn validate(input: &SyncUserRoleInput) -> Result<(), ValidationFailure> {
    if Operation::parse(&input.operation).is_none() {
        return Err(ValidationFailure::InvalidOperation(input.operation.clone()));
    }
    if blank(&input.tenant_id) {
        return Err(ValidationFailure::MissingTenantId);
    }
    if blank(&input.tenant_key) {
        return Err(ValidationFailure::MissingTenantKey);
    }
    if blank(&input.user_id) {
        return Err(ValidationFailure::MissingUserId);
    }
    if !EMAIL_PATTERN.is_match(&input.user_email) {
        return Err(ValidationFailure::InvalidEmail(input.user_email.clone()));
    }
    if blank(&input.role_key) {
        return Err(ValidationFailure::MissingRoleKey);
    }
    if blank(&input.performed_by) {
        return Err(ValidationFailure::MissingPerformedBy);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SyncUserRoleInput {
        SyncUserRoleInput {
            operation: "assign".to_string(),
            tenant_id: "t1".to_string(),
            tenant_key: "acme".to_string(),
            user_id: "u1".to_string(),
            user_email: "a@b.com".to_string(),
            role_key: "admin".to_string(),
            performed_by: "p1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert_eq!(validate(&valid()), Ok(()));
        for operation in ["assign", "update", "revoke"] {
            let input = SyncUserRoleInput {
                operation: operation.to_string(),
                ..valid()
            };
            assert_eq!(validate(&input), Ok(()));
        }
    }

    #[test]
    fn test_each_rule_rejects() {
        let cases: Vec<(SyncUserRoleInput, &str)> = vec![
            (SyncUserRoleInput { operation: "delete".into(), ..valid() }, "operation"),
            (SyncUserRoleInput { tenant_id: "".into(), ..valid() }, "tenantId"),
            (SyncUserRoleInput { tenant_key: "  ".into(), ..valid() }, "tenantKey"),
            (SyncUserRoleInput { user_id: "".into(), ..valid() }, "userId"),
            (SyncUserRoleInput { user_email: "not-an-email".into(), ..valid() }, "userEmail"),
            (SyncUserRoleInput { role_key: "".into(), ..valid() }, "roleKey"),
            (SyncUserRoleInput { performed_by: "".into(), ..valid() }, "performedBy"),
        ];

        for (input, field) in cases {
            let failure = validate(&input).unwrap_err();
            assert_eq!(failure.field(), field);
        }
    }

    #[test]
    fn test_first_violation_wins() {
        let input = SyncUserRoleInput {
            operation: "bogus".into(),
            tenant_id: "".into(),
            user_email: "nope".into(),
            ..valid()
        };
        assert_eq!(
            validate(&input),
            Err(ValidationFailure::InvalidOperation("bogus".into()))
        );

        let input = SyncUserRoleInput {
            user_email: "nope".into(),
            performed_by: "".into(),
            ..valid()
        };
        assert!(matches!(validate(&input), Err(ValidationFailure::InvalidEmail(_))));
    }

    #[test]
    fn test_email_grammar() {
        for good in ["a@b.com", "first.last@sub.example.org", "x+tag@y.io"] {
            let input = SyncUserRoleInput { user_email: good.into(), ..valid() };
            assert!(validate(&input).is_ok(), "{good} should pass");
        }
        for bad in [
            "",
            "a@b",
            "@b.com",
            "a b@c.com",
            "a@@b.com",
            "a@b.",
            "plain",
            " a@b.com",
            "a@b.com ",
            "a@b.com\n",
        ] {
            let input = SyncUserRoleInput { user_email: bad.into(), ..valid() };
            assert!(
                matches!(validate(&input), Err(ValidationFailure::InvalidEmail(_))),
                "{bad} should fail"
            );
        }
    }

    #[test]
    fn test_validation_is_repeatable() {
        let input = SyncUserRoleInput { user_email: "not-an-email".into(), ..valid() };
        let first = validate(&input);
        for _ in 0..10 {
            assert_eq!(validate(&input), first);
        }
    }
}
