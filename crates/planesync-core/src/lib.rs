// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! planesync Core - Durable Storage Substrate
//!
//! This crate holds everything a workflow instance needs to survive a crash:
//! instance rows, checkpoints (recorded activity outcomes), lifecycle events and
//! the latest status projection. The execution engine itself lives in
//! `planesync-sdk`; this crate only stores and serves state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │      planesync-server        │  HTTP: submit / status / describe
//! └──────────────┬───────────────┘
//!                │
//!                ▼
//! ┌──────────────────────────────┐
//! │   planesync-sdk (Engine)     │  start, replay, retry, recover
//! └──────────────┬───────────────┘
//!                │ Persistence trait / StatusBoard
//!                ▼
//! ┌──────────────────────────────┐
//! │  planesync-core (this crate) │
//! └──────────────┬───────────────┘
//!                ▼
//! ┌──────────────────────────────┐
//! │            SQLite            │
//! └──────────────────────────────┘
//! ```
//!
//! # Instance Status State Machine
//!
//! ```text
//!   ┌─────────┐  start   ┌─────────┐  complete  ┌───────────┐
//!   │ PENDING │─────────▶│ RUNNING │───────────▶│ COMPLETED │
//!   └─────────┘          └────┬────┘            └───────────┘
//!                             │ fail
//!                             ▼
//!                        ┌────────┐
//!                        │ FAILED │
//!                        └────────┘
//! ```
//!
//! A workflow id has at most one `PENDING`/`RUNNING` instance at a time.
//! Instances found `PENDING` or `RUNNING` at startup belong to a process that
//! died; the engine resumes them.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PLANESYNC_DATABASE_URL` | Yes | - | SQLite path or `sqlite::memory:` |
//! | `PLANESYNC_MAX_CONCURRENT_INSTANCES` | No | `32` | Maximum concurrent instances |
//! | `PLANESYNC_DUPLICATE_POLICY` | No | `reject` | `reject` or `queue` |

#![deny(missing_docs)]

/// Engine configuration loaded from environment variables.
pub mod config;

/// Error types with stable error codes.
pub mod error;

/// Persistence trait and SQLite backend for instances, checkpoints and events.
pub mod persistence;

/// Latest-value store for workflow status projections.
pub mod status;

pub use config::{Config, ConfigError, DuplicatePolicy};
pub use error::CoreError;
pub use persistence::{
    CheckpointRecord, EventRecord, InstanceRecord, InstanceStatus, Persistence,
    RetryAttemptRecord, SqlitePersistence,
};
pub use status::StatusBoard;
