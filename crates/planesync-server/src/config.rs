// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use planesync_core::{Config, ConfigError};
use planesync_user_sync::ClientSettings;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Engine settings (database, concurrency, duplicate policy)
    pub engine: Config,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// App Plane API client settings
    pub app_plane: ClientSettings,
    /// Identity provider adapter client settings
    pub identity_provider: ClientSettings,
    /// How long shutdown waits for running instances
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `PLANESYNC_DATABASE_URL`: see [`Config::from_env`]
    /// - `PLANESYNC_APP_PLANE_URL`: App Plane API base URL
    /// - `PLANESYNC_IDP_URL`: identity provider adapter base URL
    ///
    /// Optional (with defaults):
    /// - `PLANESYNC_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PLANESYNC_SERVICE_TOKEN`: bearer token for both downstream APIs
    /// - `PLANESYNC_REQUEST_TIMEOUT_MS`: per-request HTTP timeout (default: 10000)
    /// - `PLANESYNC_SHUTDOWN_GRACE_SECS`: graceful shutdown wait (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let engine = Config::from_env()?;

        let port: u16 = std::env::var("PLANESYNC_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("PLANESYNC_HTTP_PORT", "must be a port number"))?;

        let app_plane_url = required("PLANESYNC_APP_PLANE_URL")?;
        let identity_provider_url = required("PLANESYNC_IDP_URL")?;
        let service_token = std::env::var("PLANESYNC_SERVICE_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        let request_timeout_ms: u64 = std::env::var("PLANESYNC_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or(ConfigError::Invalid(
                "PLANESYNC_REQUEST_TIMEOUT_MS",
                "must be a positive number of milliseconds",
            ))?;

        let shutdown_grace_secs: u64 = std::env::var("PLANESYNC_SHUTDOWN_GRACE_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PLANESYNC_SHUTDOWN_GRACE_SECS", "must be a number of seconds")
            })?;

        let request_timeout = Duration::from_millis(request_timeout_ms);
        let client = |base_url: String| {
            let settings = ClientSettings::new(base_url).with_request_timeout(request_timeout);
            match &service_token {
                Some(token) => settings.with_service_token(token.clone()),
                None => settings,
            }
        };

        Ok(Self {
            engine,
            http_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            app_plane: client(app_plane_url),
            identity_provider: client(identity_provider_url),
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}
