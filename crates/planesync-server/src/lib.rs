// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Planesync Server
//!
//! HTTP front end for the user-role synchronization workflow. It accepts role
//! changes from the Control Plane, starts one durable instance per user, and
//! answers progress and lifecycle queries.

pub mod api;
pub mod config;

pub use api::{ApiError, AppState, build_router};
pub use config::ServerConfig;
