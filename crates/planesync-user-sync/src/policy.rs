// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry presets per activity family and the supported identity providers.

use std::fmt;
use std::time::Duration;

use planesync_sdk::{ActivityOptions, RetryPolicy, kinds};

/// Failure kinds that no amount of retrying fixes.
pub const NON_RETRYABLE_KINDS: [&str; 3] = [
    kinds::NOT_FOUND,
    kinds::VALIDATION_ERROR,
    kinds::PERMISSION_DENIED,
];

const INITIAL_INTERVAL: Duration = Duration::from_secs(1);
const BACKOFF_COEFFICIENT: f64 = 2.0;
const MAXIMUM_INTERVAL: Duration = Duration::from_secs(30);
const START_TO_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

pub const APP_PLANE_MAXIMUM_ATTEMPTS: u32 = 5;
pub const IDENTITY_PROVIDER_MAXIMUM_ATTEMPTS: u32 = 3;

fn base_policy(maximum_attempts: u32) -> RetryPolicy {
    NON_RETRYABLE_KINDS.iter().fold(
        RetryPolicy::default()
            .with_initial_interval(INITIAL_INTERVAL)
            .with_backoff_coefficient(BACKOFF_COEFFICIENT)
            .with_maximum_interval(MAXIMUM_INTERVAL)
            .with_maximum_attempts(maximum_attempts),
        |policy, kind| policy.with_non_retryable(*kind),
    )
}

/// Retry policy for App Plane activities.
pub fn app_plane_retry_policy() -> RetryPolicy {
    base_policy(APP_PLANE_MAXIMUM_ATTEMPTS)
}

/// Retry policy for the compensating IdP deactivation. Fewer attempts than the
/// App Plane: the App Plane change is the one that counts.
pub fn identity_provider_retry_policy() -> RetryPolicy {
    base_policy(IDENTITY_PROVIDER_MAXIMUM_ATTEMPTS)
}

pub fn app_plane_activity_options() -> ActivityOptions {
    ActivityOptions::new(app_plane_retry_policy()).with_start_to_close_timeout(START_TO_CLOSE_TIMEOUT)
}

pub fn identity_provider_activity_options() -> ActivityOptions {
    ActivityOptions::new(identity_provider_retry_policy())
        .with_start_to_close_timeout(START_TO_CLOSE_TIMEOUT)
}

/// Whether a failure kind is terminal for the whole request.
pub fn is_non_retryable(kind: &str) -> bool {
    NON_RETRYABLE_KINDS.contains(&kind)
}

/// Identity providers a revoked user can be deactivated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityProviderKind {
    Keycloak,
    Auth0,
    Okta,
}

impl IdentityProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keycloak => "keycloak",
            Self::Auth0 => "auth0",
            Self::Okta => "okta",
        }
    }

    /// Resolve a caller-supplied kind. `None` for anything unsupported.
    pub fn parse(value: &str) -> Option<Self> {
        [Self::Keycloak, Self::Auth0, Self::Okta]
            .into_iter()
            .find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for IdentityProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planesync_sdk::RetryDecision;

    #[test]
    fn test_app_plane_preset() {
        let policy = app_plane_retry_policy();
        assert_eq!(policy.initial_interval_ms, 1_000);
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert_eq!(policy.maximum_interval_ms, 30_000);
        assert_eq!(policy.maximum_attempts, 5);
        assert!(policy.validate().is_ok());

        let delays: Vec<u64> = (1..=6)
            .map(|n| policy.delay_for_attempt(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000]);
    }

    #[test]
    fn test_identity_provider_preset_has_fewer_attempts() {
        let idp = identity_provider_retry_policy();
        assert_eq!(idp.maximum_attempts, 3);
        assert!(idp.maximum_attempts < app_plane_retry_policy().maximum_attempts);
        assert_eq!(idp.decide(3, kinds::TRANSIENT), RetryDecision::Exhausted);
    }

    #[test]
    fn test_terminal_kinds_are_not_retried() {
        let policy = app_plane_retry_policy();
        for kind in NON_RETRYABLE_KINDS {
            assert_eq!(policy.decide(1, kind), RetryDecision::NonRetryable);
            assert!(is_non_retryable(kind));
        }
        assert!(!is_non_retryable(kinds::TRANSIENT));
        assert!(!is_non_retryable(kinds::CONFLICT));
    }

    #[test]
    fn test_options_bound_each_attempt() {
        let options = app_plane_activity_options();
        assert_eq!(options.start_to_close_timeout, Some(Duration::from_secs(30)));
        let options = identity_provider_activity_options();
        assert_eq!(options.retry.maximum_attempts, 3);
    }

    #[test]
    fn test_identity_provider_kinds() {
        assert_eq!(IdentityProviderKind::parse("keycloak"), Some(IdentityProviderKind::Keycloak));
        assert_eq!(IdentityProviderKind::parse("auth0"), Some(IdentityProviderKind::Auth0));
        assert_eq!(IdentityProviderKind::parse("okta"), Some(IdentityProviderKind::Okta));
        assert_eq!(IdentityProviderKind::parse(" OKTA "), None);
        assert_eq!(IdentityProviderKind::parse("ldap"), None);
        assert_eq!(IdentityProviderKind::parse(""), None);
    }
}
