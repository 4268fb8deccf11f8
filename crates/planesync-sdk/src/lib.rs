// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Planesync SDK - workflow authoring API and embedded durable runtime.
//!
//! A workflow is a deterministic async body implementing [`Workflow`]. Every
//! side effect it performs goes through [`WorkflowContext::activity`], which
//! applies a [`RetryPolicy`] and records the final outcome as a checkpoint in
//! `planesync-core`. When a process dies mid-run, [`Engine::recover`] executes
//! the body again; recorded outcomes are replayed in call order, so only the
//! steps that never finished touch the outside world.
//!
//! # Features
//!
//! - **Activities with retry**: exponential backoff, attempt limits,
//!   non-retryable error kinds and a per-attempt start-to-close timeout
//! - **Replay**: recorded activity outcomes are returned without re-running
//! - **Idempotency keys**: stable per step, handed to every attempt
//! - **Status projection**: readable any time through [`Engine::query_status`]
//! - **Custom events**: emitted once per step, even across replays
//! - **Duplicate handling**: one instance in flight per workflow id, extra
//!   starts rejected or queued
//!
//! # Quick Start
//!
//! ```ignore
//! use planesync_sdk::{ActivityOptions, Engine, RetryPolicy, Workflow, WorkflowContext};
//!
//! struct Greet;
//!
//! #[async_trait::async_trait]
//! impl Workflow for Greet {
//!     const NAME: &'static str = "greet";
//!     type Input = String;
//!     type Output = String;
//!     type Error = MyError;
//!
//!     async fn run(&self, ctx: &WorkflowContext, name: String) -> Result<String, MyError> {
//!         let options = ActivityOptions::new(RetryPolicy::default().with_maximum_attempts(3));
//!         let greeting = ctx
//!             .activity("compose", &options, |_| {
//!                 let name = name.clone();
//!                 async move { Ok(format!("hello {name}")) }
//!             })
//!             .await?;
//!         Ok(greeting)
//!     }
//! }
//!
//! let engine = Engine::builder().persistence(persistence).register(Greet).build()?;
//! let greeting = engine.execute::<Greet>("greet:alice", "tenant-1", "alice".into()).await?;
//! ```
//!
//! # Checkpoint ids
//!
//! | Call | Checkpoint id |
//! |------|---------------|
//! | `activity(name, ..)` | `activity::{seq}::{name}` |
//! | failed attempt `n` | `activity::{seq}::{name}::retry::{n}` |
//! | `custom_event(subtype, ..)` | `event::{seq}::{subtype}` |
//!
//! `seq` counts activity and event calls in program order, starting at 0.
//! Retry numbering of a step continues across restarts.

mod activity;
mod backend;
mod context;
mod engine;
mod error;
mod retry;
mod workflow;

// Main types
pub use context::WorkflowContext;
pub use engine::{Engine, EngineBuilder, ExecutionError, WorkflowDescription, WorkflowHandle};
pub use error::{Result, SdkError};
pub use workflow::{Workflow, WorkflowError};

// Activities and retry
pub use activity::{
    ActivityContext, ActivityError, ActivityOptions, IdempotencyKey, RecordedOutcome, kinds,
};
pub use retry::{RetryDecision, RetryPolicy};

// Backend access for custom runtimes and tests
pub use backend::embedded::EmbeddedBackend;
pub use backend::{CheckpointResult, SdkBackend};

// Re-export the storage layer so embedders need a single dependency
pub use planesync_core::{
    DuplicatePolicy, Persistence, RetryAttemptRecord, SqlitePersistence, StatusBoard,
};
