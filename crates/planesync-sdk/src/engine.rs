// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded durable engine.
//!
//! [`Engine`] owns the workflow registry and runs instances on the current
//! tokio runtime. It is the piece that turns a [`Workflow`] into a durable
//! execution:
//!
//! - every start is persisted (with its input) before the body runs
//! - a workflow id has at most one instance in flight; a second start is
//!   rejected or queued according to [`DuplicatePolicy`]
//! - instances left `queued`/`pending`/`running` by a previous process are
//!   picked up again by [`Engine::recover`] and replayed from their checkpoints
//! - status queries are answered from the [`StatusBoard`], falling back to the
//!   projection stored with the latest instance
//!
//! # Example
//!
//! ```rust,ignore
//! let persistence = Arc::new(SqlitePersistence::from_path(".data/planesync.db").await?);
//!
//! let engine = Engine::builder()
//!     .persistence(persistence)
//!     .register(MyWorkflow::new(clients))
//!     .build()?;
//!
//! engine.recover().await?;
//! let handle = engine.start::<MyWorkflow>("my-workflow-id", "tenant-1", input).await?;
//! let output = handle.result().await?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use planesync_core::persistence::{InstanceRecord, Persistence};
use planesync_core::{Config, DuplicatePolicy, StatusBoard};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Semaphore, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::backend::SdkBackend;
use crate::backend::embedded::EmbeddedBackend;
use crate::context::WorkflowContext;
use crate::error::{Result, SdkError};
use crate::workflow::{Workflow, WorkflowError};

const DEFAULT_MAX_CONCURRENT_INSTANCES: usize = 32;

type ResumeFn = Arc<dyn Fn(&Engine, InstanceRecord) -> Result<()> + Send + Sync>;

struct Registration {
    workflow: Arc<dyn Any + Send + Sync>,
    resume: ResumeFn,
}

/// Builder for creating an [`Engine`].
pub struct EngineBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    status: Option<Arc<StatusBoard>>,
    max_concurrent_instances: usize,
    duplicate_policy: DuplicatePolicy,
    registrations: HashMap<&'static str, Registration>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("max_concurrent_instances", &self.max_concurrent_instances)
            .field("duplicate_policy", &self.duplicate_policy)
            .field("workflows", &self.registrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            persistence: None,
            status: None,
            max_concurrent_instances: DEFAULT_MAX_CONCURRENT_INSTANCES,
            duplicate_policy: DuplicatePolicy::default(),
            registrations: HashMap::new(),
        }
    }
}

impl EngineBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Share an existing status board instead of creating one.
    pub fn status_board(mut self, status: Arc<StatusBoard>) -> Self {
        self.status = Some(status);
        self
    }

    /// Limit how many instances execute at once.
    pub fn max_concurrent_instances(mut self, max: usize) -> Self {
        self.max_concurrent_instances = max.max(1);
        self
    }

    /// Choose what happens to a start for a workflow id that is already in flight.
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Apply the engine settings from a loaded [`Config`].
    pub fn config(self, config: &Config) -> Self {
        self.max_concurrent_instances(config.max_concurrent_instances as usize)
            .duplicate_policy(config.duplicate_policy)
    }

    /// Register a workflow implementation under [`Workflow::NAME`].
    pub fn register<W: Workflow>(mut self, workflow: W) -> Self {
        let workflow = Arc::new(workflow);
        let for_resume = workflow.clone();

        let resume: ResumeFn = Arc::new(move |engine: &Engine, record: InstanceRecord| {
            let input: W::Input = match record.input.as_deref() {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => {
                    return Err(SdkError::Internal(format!(
                        "instance '{}' has no stored input",
                        record.instance_id
                    )));
                }
            };
            let ids = InstanceIds::from_record(&record);
            engine.spawn_instance(for_resume.clone(), ids, input, None);
            Ok(())
        });

        self.registrations.insert(
            W::NAME,
            Registration {
                workflow,
                resume,
            },
        );
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<Engine> {
        let persistence = self
            .persistence
            .ok_or_else(|| SdkError::Config("persistence is required".to_string()))?;

        Ok(Engine {
            inner: Arc::new(EngineInner {
                persistence,
                status: self.status.unwrap_or_default(),
                registrations: self.registrations,
                permits: Arc::new(Semaphore::new(self.max_concurrent_instances)),
                duplicate_policy: self.duplicate_policy,
                lanes: DashMap::new(),
                lane_generation: AtomicU64::new(0),
                tasks: TaskTracker::new(),
            }),
        })
    }
}

/// Identifiers of one instance.
#[derive(Debug, Clone)]
struct InstanceIds {
    instance_id: String,
    workflow_id: String,
    tenant_id: String,
}

impl InstanceIds {
    fn from_record(record: &InstanceRecord) -> Self {
        Self {
            instance_id: record.instance_id.clone(),
            workflow_id: record.workflow_id.clone(),
            tenant_id: record.tenant_id.clone(),
        }
    }
}

/// Place in the per-workflow-id line. The holder runs once `wait` resolves
/// and lets the next one through by sending on `done`. A ticket dropped
/// without [`Engine::leave_lane`] still frees the lane, as a closed channel.
struct LaneTicket {
    workflow_id: String,
    generation: u64,
    wait: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

struct EngineInner {
    persistence: Arc<dyn Persistence>,
    status: Arc<StatusBoard>,
    registrations: HashMap<&'static str, Registration>,
    permits: Arc<Semaphore>,
    duplicate_policy: DuplicatePolicy,
    lanes: DashMap<String, (u64, oneshot::Receiver<()>)>,
    lane_generation: AtomicU64,
    tasks: TaskTracker,
}

/// Embedded durable workflow engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("workflows", &self.inner.registrations.keys().collect::<Vec<_>>())
            .field("duplicate_policy", &self.inner.duplicate_policy)
            .field("available_permits", &self.inner.permits.available_permits())
            .field("tasks", &self.inner.tasks.len())
            .finish()
    }
}

/// Lifecycle view of the latest instance of a workflow id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDescription {
    /// Stable workflow id.
    pub workflow_id: String,
    /// Run id of the latest instance.
    pub instance_id: String,
    /// Registered workflow type.
    pub workflow_type: String,
    /// Tenant of the instance.
    pub tenant_id: String,
    /// queued, pending, running, completed or failed.
    pub status: String,
    /// Workflow output, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message, once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure kind, once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance started running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowDescription {
    fn from_record(record: InstanceRecord) -> Self {
        let output = record
            .output
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok());
        Self {
            workflow_id: record.workflow_id,
            instance_id: record.instance_id,
            workflow_type: record.workflow_type,
            tenant_id: record.tenant_id,
            status: record.status,
            output,
            error: record.error,
            error_kind: record.error_kind,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }
}

/// Why awaiting a workflow result did not yield the workflow's own outcome.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError<E> {
    /// The workflow body returned an error.
    #[error(transparent)]
    Workflow(E),
    /// The instance never finished in this process (shutdown, storage failure).
    #[error("workflow instance did not finish: {0}")]
    Runtime(SdkError),
}

/// Handle to a started instance.
pub struct WorkflowHandle<W: Workflow> {
    workflow_id: String,
    instance_id: String,
    result: oneshot::Receiver<std::result::Result<W::Output, W::Error>>,
}

impl<W: Workflow> std::fmt::Debug for WorkflowHandle<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("workflow", &W::NAME)
            .field("workflow_id", &self.workflow_id)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl<W: Workflow> WorkflowHandle<W> {
    /// Stable workflow id.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Run id of this instance.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Wait for the instance to finish.
    pub async fn result(self) -> std::result::Result<W::Output, ExecutionError<W::Error>> {
        match self.result.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(ExecutionError::Workflow(err)),
            Err(_) => Err(ExecutionError::Runtime(SdkError::Internal(format!(
                "instance '{}' ended without a result",
                self.instance_id
            )))),
        }
    }
}

impl Engine {
    /// Create a new builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Persistence layer shared by all instances.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.inner.persistence
    }

    /// Status board behind [`Engine::query_status`].
    pub fn status_board(&self) -> &Arc<StatusBoard> {
        &self.inner.status
    }

    /// Configured duplicate policy.
    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.inner.duplicate_policy
    }

    fn workflow<W: Workflow>(&self) -> Result<Arc<W>> {
        let registration = self
            .inner
            .registrations
            .get(W::NAME)
            .ok_or_else(|| SdkError::UnknownWorkflow(W::NAME.to_string()))?;

        registration
            .workflow
            .clone()
            .downcast::<W>()
            .map_err(|_| SdkError::UnknownWorkflow(W::NAME.to_string()))
    }

    // ========== Starting ==========

    /// Persist and start a new instance of `W` under `workflow_id`.
    ///
    /// Returns as soon as the instance is stored; the body runs in the
    /// background. With [`DuplicatePolicy::Reject`] a start for a workflow id
    /// that already has an instance in flight fails with
    /// [`SdkError::AlreadyRunning`]; with [`DuplicatePolicy::Queue`] it is
    /// stored as `queued` and runs after the earlier instances of that id.
    pub async fn start<W: Workflow>(
        &self,
        workflow_id: &str,
        tenant_id: &str,
        input: W::Input,
    ) -> Result<WorkflowHandle<W>> {
        if self.inner.tasks.is_closed() {
            return Err(SdkError::ShuttingDown);
        }
        if workflow_id.trim().is_empty() {
            return Err(SdkError::Config("workflow id must not be empty".to_string()));
        }

        let workflow = self.workflow::<W>()?;
        let input_bytes = serde_json::to_vec(&input)?;
        let ids = InstanceIds {
            instance_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            tenant_id: tenant_id.to_string(),
        };

        match self.inner.duplicate_policy {
            DuplicatePolicy::Reject => {
                self.inner
                    .persistence
                    .register_instance(&ids.instance_id, workflow_id, W::NAME, tenant_id, &input_bytes)
                    .await?
            }
            DuplicatePolicy::Queue => {
                self.inner
                    .persistence
                    .enqueue_instance(&ids.instance_id, workflow_id, W::NAME, tenant_id, &input_bytes)
                    .await?
            }
        }

        info!(
            workflow_type = W::NAME,
            workflow_id = %workflow_id,
            instance_id = %ids.instance_id,
            policy = %self.inner.duplicate_policy,
            "Workflow instance submitted"
        );

        let (tx, rx) = oneshot::channel();
        let instance_id = ids.instance_id.clone();
        self.spawn_instance(workflow, ids, input, Some(tx));

        Ok(WorkflowHandle {
            workflow_id: workflow_id.to_string(),
            instance_id,
            result: rx,
        })
    }

    /// Start an instance and wait for its outcome.
    pub async fn execute<W: Workflow>(
        &self,
        workflow_id: &str,
        tenant_id: &str,
        input: W::Input,
    ) -> std::result::Result<W::Output, ExecutionError<W::Error>> {
        let handle = self
            .start::<W>(workflow_id, tenant_id, input)
            .await
            .map_err(ExecutionError::Runtime)?;
        handle.result().await
    }

    fn enter_lane(&self, workflow_id: &str) -> LaneTicket {
        let (done, next) = oneshot::channel();
        let generation = self.inner.lane_generation.fetch_add(1, Ordering::SeqCst);
        let wait = self
            .inner
            .lanes
            .insert(workflow_id.to_string(), (generation, next))
            .map(|(_, previous)| previous);
        LaneTicket {
            workflow_id: workflow_id.to_string(),
            generation,
            wait,
            done,
        }
    }

    fn leave_lane(&self, ticket: LaneTicket) {
        let LaneTicket {
            workflow_id,
            generation,
            done,
            ..
        } = ticket;

        // The entry guard keeps a new instance of this id out until the board is cleared.
        match self.inner.lanes.entry(workflow_id.clone()) {
            Entry::Occupied(lane) if lane.get().0 == generation => {
                // Nobody queued behind us; the stored projection answers from now on.
                lane.remove();
                self.inner.status.clear(&workflow_id);
            }
            _ => {
                if done.send(()).is_err() {
                    debug!(workflow_id = %workflow_id, "Next instance in lane is gone");
                }
            }
        }
    }

    fn spawn_instance<W: Workflow>(
        &self,
        workflow: Arc<W>,
        ids: InstanceIds,
        input: W::Input,
        reply: Option<oneshot::Sender<std::result::Result<W::Output, W::Error>>>,
    ) {
        // Taken synchronously so instances of one workflow id run in submission order.
        let ticket = self.enter_lane(&ids.workflow_id);
        let span = info_span!(
            "workflow",
            workflow_type = W::NAME,
            workflow_id = %ids.workflow_id,
            instance_id = %ids.instance_id
        );
        let engine = self.clone();

        self.inner.tasks.spawn(
            async move {
                let mut ticket = ticket;
                if let Some(previous) = ticket.wait.take() {
                    if previous.await.is_err() {
                        warn!("Previous instance of this workflow id ended without releasing its lane");
                    }
                }

                let outcome = engine.run_instance(workflow, &ids, input).await;
                engine.leave_lane(ticket);

                match outcome {
                    Ok(result) => {
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Workflow instance could not run");
                    }
                }
            }
            .instrument(span),
        );
    }

    async fn run_instance<W: Workflow>(
        &self,
        workflow: Arc<W>,
        ids: &InstanceIds,
        input: W::Input,
    ) -> Result<std::result::Result<W::Output, W::Error>> {
        let _permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SdkError::ShuttingDown)?;

        let backend = Arc::new(EmbeddedBackend::new(
            self.inner.persistence.clone(),
            ids.instance_id.clone(),
            ids.workflow_id.clone(),
            ids.tenant_id.clone(),
        ));
        backend.start().await?;

        let ctx = WorkflowContext::new(backend.clone(), self.inner.status.clone());
        let result = workflow.run(&ctx, input).await;

        match &result {
            Ok(output) => {
                let recorded = match serde_json::to_vec(output) {
                    Ok(bytes) => backend.completed(&bytes).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = recorded {
                    error!(error = %e, "Failed to record workflow completion");
                } else {
                    info!("Workflow completed");
                }
            }
            Err(err) => {
                error!(error = %err, error_kind = %err.kind(), "Workflow failed");
                if let Err(e) = backend.failed(&err.to_string(), err.kind()).await {
                    error!(error = %e, "Failed to record workflow failure");
                }
            }
        }

        Ok(result)
    }

    // ========== Recovery ==========

    /// Resume every instance a previous process left unfinished.
    ///
    /// Instances are resumed oldest first with their original run id and
    /// input; recorded activity outcomes are replayed, so completed side
    /// effects are not repeated. Returns the number of instances resumed.
    pub async fn recover(&self) -> Result<usize> {
        let mut resumed = 0;

        for (workflow_type, registration) in &self.inner.registrations {
            let records = self
                .inner
                .persistence
                .list_recoverable_instances(workflow_type)
                .await?;

            for record in records {
                info!(
                    workflow_type = %workflow_type,
                    workflow_id = %record.workflow_id,
                    instance_id = %record.instance_id,
                    status = %record.status,
                    "Resuming unfinished workflow instance"
                );
                let instance_id = record.instance_id.clone();
                match (registration.resume)(self, record) {
                    Ok(()) => resumed += 1,
                    Err(e) => {
                        error!(instance_id = %instance_id, error = %e, "Could not resume instance");
                        self.abandon(&instance_id, &e).await;
                    }
                }
            }
        }

        if resumed > 0 {
            info!(count = resumed, "Recovered unfinished workflow instances");
        }
        Ok(resumed)
    }

    /// Mark an instance that can never run again as failed so its workflow id is freed.
    async fn abandon(&self, instance_id: &str, reason: &SdkError) {
        let persistence = &self.inner.persistence;
        let result = async {
            persistence
                .update_instance_status(instance_id, "running", None)
                .await?;
            persistence
                .complete_instance_if_running(
                    instance_id,
                    "failed",
                    None,
                    Some(&reason.to_string()),
                    Some(crate::activity::kinds::RUNTIME),
                )
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(instance_id = %instance_id, error = %e, "Could not mark instance as failed");
        }
    }

    // ========== Queries ==========

    /// Latest status projection published under `workflow_id`.
    ///
    /// Answered from memory when this process ran the instance, otherwise from
    /// the projection stored with the latest instance. Never waits on a running
    /// workflow.
    pub async fn query_status(&self, workflow_id: &str) -> Result<Option<Value>> {
        if let Some(value) = self.inner.status.latest(workflow_id) {
            return Ok(Some(value));
        }

        let Some(record) = self.inner.persistence.latest_instance(workflow_id).await? else {
            return Ok(None);
        };

        record
            .status_projection
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
            .map_err(Into::into)
    }

    /// Lifecycle of the latest instance of `workflow_id`.
    pub async fn describe(&self, workflow_id: &str) -> Result<Option<WorkflowDescription>> {
        Ok(self
            .inner
            .persistence
            .latest_instance(workflow_id)
            .await?
            .map(WorkflowDescription::from_record))
    }

    // ========== Shutdown ==========

    /// Stop accepting work and wait up to `grace` for running instances.
    ///
    /// Instances that have not started yet stay stored and are picked up by
    /// [`Engine::recover`] on the next start.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.tasks.close();
        self.inner.permits.close();

        if tokio::time::timeout(grace, self.inner.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.inner.tasks.len(),
                "Shutdown grace period elapsed with instances still running"
            );
        } else {
            info!("Engine stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planesync_core::SqlitePersistence;
    use serde_json::json;

    async fn engine() -> Engine {
        let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        Engine::builder().persistence(persistence).build().unwrap()
    }

    #[tokio::test]
    async fn test_lane_passes_to_next_in_line() {
        let engine = engine().await;
        let first = engine.enter_lane("wf-1");
        let mut second = engine.enter_lane("wf-1");
        assert!(first.wait.is_none());

        engine.status_board().publish("wf-1", json!({"step": "syncing_user"}));
        engine.leave_lane(first);

        assert!(second.wait.take().unwrap().await.is_ok());
        // Still held by the second instance.
        assert!(engine.status_board().latest("wf-1").is_some());

        engine.leave_lane(second);
        assert!(engine.inner.lanes.is_empty());
        assert!(engine.status_board().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_ticket_still_frees_lane() {
        let engine = engine().await;
        let first = engine.enter_lane("wf-1");
        let mut second = engine.enter_lane("wf-1");

        drop(first);

        assert!(second.wait.take().unwrap().await.is_err());
        engine.leave_lane(second);
        assert!(engine.inner.lanes.is_empty());
    }

    #[tokio::test]
    async fn test_lanes_of_other_ids_are_independent() {
        let engine = engine().await;
        let a = engine.enter_lane("wf-a");
        let b = engine.enter_lane("wf-b");
        assert!(b.wait.is_none());

        engine.status_board().publish("wf-a", json!({}));
        engine.status_board().publish("wf-b", json!({}));
        engine.leave_lane(a);

        assert!(engine.status_board().latest("wf-a").is_none());
        assert!(engine.status_board().latest("wf-b").is_some());
        engine.leave_lane(b);
    }
}
