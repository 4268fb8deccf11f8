// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::fmt;
use std::str::FromStr;

/// What happens when a workflow is started under an id that already has an
/// instance in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Refuse the new submission.
    #[default]
    Reject,
    /// Hold the new submission until the in-flight instance finishes, then run it.
    Queue,
}

impl DuplicatePolicy {
    /// Lowercase name as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Queue => "queue",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "queue" => Ok(Self::Queue),
            _ => Err(ConfigError::Invalid(
                "PLANESYNC_DUPLICATE_POLICY",
                "must be 'reject' or 'queue'",
            )),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path or URL
    pub database_url: String,
    /// Maximum number of workflow instances executing at once
    pub max_concurrent_instances: u32,
    /// Handling of submissions for a workflow id that is already in flight
    pub duplicate_policy: DuplicatePolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `PLANESYNC_DATABASE_URL`: SQLite file path (or `sqlite::memory:`)
    ///
    /// Optional (with defaults):
    /// - `PLANESYNC_MAX_CONCURRENT_INSTANCES`: Max concurrent instances (default: 32)
    /// - `PLANESYNC_DUPLICATE_POLICY`: `reject` or `queue` (default: reject)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("PLANESYNC_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("PLANESYNC_DATABASE_URL"))?;

        let max_concurrent_instances: u32 = std::env::var("PLANESYNC_MAX_CONCURRENT_INSTANCES")
            .unwrap_or_else(|_| "32".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "PLANESYNC_MAX_CONCURRENT_INSTANCES",
                "must be a positive integer",
            ))?;

        let duplicate_policy = match std::env::var("PLANESYNC_DUPLICATE_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => DuplicatePolicy::default(),
        };

        Ok(Self {
            database_url,
            max_concurrent_instances,
            duplicate_policy,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
