// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Planesync Server - user-role synchronization service
//!
//! Runs the embedded durable engine with the user-role sync workflow
//! registered, resumes instances left unfinished by a previous process, and
//! serves the HTTP API.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use planesync_sdk::{Engine, SqlitePersistence};
use planesync_server::{AppState, ServerConfig, build_router};
use planesync_user_sync::{HttpAppPlaneClient, HttpIdentityProviderClient, SyncUserRoleWorkflow};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("planesync_core=info".parse()?)
                .add_directive("planesync_sdk=info".parse()?)
                .add_directive("planesync_user_sync=info".parse()?)
                .add_directive("planesync_server=info".parse()?),
        )
        .init();

    info!("Starting Planesync Server");

    let config = ServerConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        app_plane_url = %config.app_plane.base_url,
        idp_url = %config.identity_provider.base_url,
        max_instances = config.engine.max_concurrent_instances,
        duplicate_policy = %config.engine.duplicate_policy,
        "Configuration loaded"
    );

    info!("Opening database...");
    let persistence = Arc::new(SqlitePersistence::connect(&config.engine.database_url).await?);
    info!("Database ready");

    let workflow = SyncUserRoleWorkflow::new(
        Arc::new(HttpAppPlaneClient::new(&config.app_plane)?),
        Arc::new(HttpIdentityProviderClient::new(&config.identity_provider)?),
    );

    let engine = Engine::builder()
        .persistence(persistence.clone())
        .config(&config.engine)
        .register(workflow)
        .build()?;

    let resumed = engine.recover().await?;
    info!(resumed, "Recovery completed");

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP API listening");

    axum::serve(listener, build_router(AppState::new(engine.clone())))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    engine.shutdown(config.shutdown_grace).await;
    persistence.close().await;
    info!("Shutdown complete");

    Ok(())
}
