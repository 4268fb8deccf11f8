// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP implementations of the activity traits.
//!
//! Both planes expose internal JSON endpoints. Every request carries the step's
//! idempotency key so the remote side can deduplicate retried attempts, and
//! every non-2xx response is turned into an [`ActivityError`] whose kind drives
//! the retry decision.

use std::time::Duration;

use async_trait::async_trait;
use planesync_sdk::{ActivityContext, ActivityError, kinds};
use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::activities::{
    AppPlaneActivities, CreateOrUpdateUser, DeactivateUser, IdentityProviderActivities,
    RevokeUserRole, RoleRevoked, RoleUpdated, UpdateUserRole, UserDeactivation, UserProvisioned,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const ATTEMPT_HEADER: &str = "X-Planesync-Attempt";

const MAX_ERROR_BODY: usize = 512;

/// Connection settings shared by both clients.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    /// Bearer token sent with every request.
    pub service_token: Option<String>,
    pub request_timeout: Duration,
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            service_token: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Map a non-success HTTP status to a failure kind.
pub fn classify_status(status: u16) -> &'static str {
    match status {
        404 => kinds::NOT_FOUND,
        400 | 422 => kinds::VALIDATION_ERROR,
        401 | 403 => kinds::PERMISSION_DENIED,
        409 => kinds::CONFLICT,
        429 => kinds::RATE_LIMITED,
        _ => kinds::TRANSIENT,
    }
}

/// Best human-readable message in an error body.
fn error_message(status: u16, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            ["message", "error", "detail"]
                .iter()
                .find_map(|key| json.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        });

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => format!("HTTP {}", status),
        None => body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

#[derive(Debug, Clone)]
struct JsonTransport {
    http: reqwest::Client,
    base_url: Url,
    service_token: Option<String>,
}

impl JsonTransport {
    fn new(settings: &ClientSettings, user_agent: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(&settings.base_url).map_err(|e| ClientError::InvalidBaseUrl {
            url: settings.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl {
                url: settings.base_url.clone(),
                reason: "URL cannot carry a path".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            http,
            base_url,
            service_token: settings.service_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send<B, T>(
        &self,
        method: Method,
        url: Url,
        ctx: &ActivityContext,
        body: &B,
    ) -> Result<T, ActivityError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!(
            method = %method,
            url = %url,
            activity = %ctx.activity,
            attempt = ctx.attempt,
            "Sending activity request"
        );

        let mut request = self
            .http
            .request(method, url.clone())
            .header(IDEMPOTENCY_KEY_HEADER, ctx.idempotency_key.as_str())
            .header(ATTEMPT_HEADER, ctx.attempt.to_string())
            .json(body);
        if let Some(token) = &self.service_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ActivityError::timeout(format!("request to {} timed out", url))
            } else {
                ActivityError::transient(format!("request to {} failed: {}", url, e))
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                ActivityError::new(classify_status(status), error_message(status, &body))
                    .with_status(status),
            );
        }

        response.json::<T>().await.map_err(|e| {
            ActivityError::invalid_response(format!("undecodable response from {}: {}", url, e))
                .with_status(status)
        })
    }
}

/// App Plane internal API client.
#[derive(Debug, Clone)]
pub struct HttpAppPlaneClient {
    transport: JsonTransport,
}

impl HttpAppPlaneClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, ClientError> {
        Ok(Self {
            transport: JsonTransport::new(settings, "planesync-app-plane-client")?,
        })
    }

    fn users_url(&self, tenant_id: &str, rest: &[&str]) -> Url {
        let mut segments = vec!["internal", "tenants", tenant_id, "users"];
        segments.extend_from_slice(rest);
        self.transport.endpoint(&segments)
    }
}

#[async_trait]
impl AppPlaneActivities for HttpAppPlaneClient {
    async fn create_or_update_user(
        &self,
        ctx: &ActivityContext,
        request: &CreateOrUpdateUser,
    ) -> Result<UserProvisioned, ActivityError> {
        let url = self.users_url(&request.tenant_id, &[]);
        self.transport.send(Method::POST, url, ctx, request).await
    }

    async fn update_user_role(
        &self,
        ctx: &ActivityContext,
        request: &UpdateUserRole,
    ) -> Result<RoleUpdated, ActivityError> {
        let url = self.users_url(&request.tenant_id, &["role"]);
        self.transport.send(Method::PUT, url, ctx, request).await
    }

    async fn revoke_user_role(
        &self,
        ctx: &ActivityContext,
        request: &RevokeUserRole,
    ) -> Result<RoleRevoked, ActivityError> {
        let url = self.users_url(&request.tenant_id, &["revoke-role"]);
        self.transport.send(Method::POST, url, ctx, request).await
    }
}

/// Identity provider integration client.
#[derive(Debug, Clone)]
pub struct HttpIdentityProviderClient {
    transport: JsonTransport,
}

impl HttpIdentityProviderClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, ClientError> {
        Ok(Self {
            transport: JsonTransport::new(settings, "planesync-identity-provider-client")?,
        })
    }
}

#[async_trait]
impl IdentityProviderActivities for HttpIdentityProviderClient {
    async fn deactivate_user(
        &self,
        ctx: &ActivityContext,
        request: &DeactivateUser,
    ) -> Result<UserDeactivation, ActivityError> {
        let url = self.transport.endpoint(&[
            "internal",
            "identity-providers",
            &request.provider,
            "users",
            "deactivate",
        ]);
        self.transport.send(Method::POST, url, ctx, request).await
    }
}
