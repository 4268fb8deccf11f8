// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-instance context handed to a running workflow body.
//!
//! Everything a workflow does that must survive a crash goes through here:
//! activity calls, status updates and custom events. Calls are numbered in
//! program order; the number is part of every checkpoint id, so replaying the
//! same body against the same checkpoints yields the same results without
//! touching the outside world again.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use planesync_core::StatusBoard;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityContext, ActivityError, ActivityOptions, IdempotencyKey, RecordedOutcome};
use crate::backend::SdkBackend;
use crate::error::Result;
use crate::retry::RetryDecision;

/// Handle a workflow body uses to reach the durable runtime.
pub struct WorkflowContext {
    backend: Arc<dyn SdkBackend>,
    status: Arc<StatusBoard>,
    sequence: AtomicU32,
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("instance_id", &self.backend.instance_id())
            .field("workflow_id", &self.backend.workflow_id())
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .finish()
    }
}

impl WorkflowContext {
    /// Create a context over a backend, publishing status to `status`.
    pub fn new(backend: Arc<dyn SdkBackend>, status: Arc<StatusBoard>) -> Self {
        Self {
            backend,
            status,
            sequence: AtomicU32::new(0),
        }
    }

    /// Instance (run) id.
    pub fn instance_id(&self) -> &str {
        self.backend.instance_id()
    }

    /// Stable workflow id.
    pub fn workflow_id(&self) -> &str {
        self.backend.workflow_id()
    }

    /// Tenant of the instance.
    pub fn tenant_id(&self) -> &str {
        self.backend.tenant_id()
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    // ========== Activities ==========

    /// Run an activity through the retry proxy.
    ///
    /// If this step already has a recorded outcome the recorded value (or
    /// failure) is returned and `f` is not called. Otherwise `f` is invoked once
    /// per attempt, each attempt bounded by the start-to-close timeout, until it
    /// succeeds, fails with a non-retryable kind, or the policy runs out of
    /// attempts. Failed attempts recorded before a restart count against the
    /// policy, so numbering resumes after the last one. The final outcome is
    /// recorded before it is returned.
    pub async fn activity<T, F, Fut>(
        &self,
        name: &str,
        options: &ActivityOptions,
        mut f: F,
    ) -> std::result::Result<T, ActivityError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(ActivityContext) -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, ActivityError>> + Send,
    {
        let sequence = self.next_sequence();
        let checkpoint_id = format!("activity::{}::{}", sequence, name);

        if let Some(state) = self.backend.get_checkpoint(&checkpoint_id).await? {
            let recorded: RecordedOutcome<T> = serde_json::from_slice(&state)
                .map_err(|e| ActivityError::new(crate::activity::kinds::RUNTIME, e.to_string()))?;
            debug!(activity = %name, sequence, "Replaying recorded activity outcome");
            return recorded.into_result();
        }

        let idempotency_key = IdempotencyKey::new(self.instance_id(), sequence, name);

        // Attempts recorded before a restart count against the policy.
        let mut attempt = match self.backend.retry_attempts(&checkpoint_id).await?.last() {
            Some(previous) => {
                if !options.retry.has_attempts_left(previous.attempt) {
                    error!(activity = %name, attempts = previous.attempt, "Activity retries exhausted before restart");
                    let message = previous
                        .error_message
                        .clone()
                        .unwrap_or_else(|| format!("{} attempts recorded before restart", previous.attempt));
                    return self
                        .fail(&checkpoint_id, ActivityError::transient(message), previous.attempt)
                        .await;
                }
                info!(activity = %name, recorded_attempts = previous.attempt, "Resuming activity retries");
                tokio::time::sleep(options.retry.delay_for_attempt(previous.attempt)).await;
                previous.attempt + 1
            }
            None => 1,
        };

        loop {
            let activity_ctx = ActivityContext {
                activity: name.to_string(),
                idempotency_key: idempotency_key.clone(),
                attempt,
                tenant_id: self.tenant_id().to_string(),
            };

            let result = match options.start_to_close_timeout {
                Some(limit) => match tokio::time::timeout(limit, f(activity_ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(ActivityError::timeout(format!(
                        "attempt {} exceeded start-to-close timeout of {:?}",
                        attempt, limit
                    ))),
                },
                None => f(activity_ctx).await,
            };

            let err = match result {
                Ok(value) => {
                    self.record(&checkpoint_id, &RecordedOutcome::Completed { value: &value })
                        .await?;
                    if attempt > 1 {
                        info!(activity = %name, attempt, "Activity succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match options.retry.decide(attempt, &err.kind) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        activity = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Activity attempt failed, retrying"
                    );
                    self.backend
                        .record_retry_attempt(&checkpoint_id, attempt, Some(&err.to_string()))
                        .await?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::NonRetryable => {
                    warn!(activity = %name, attempt, error = %err, "Activity failed with non-retryable error");
                    return self.fail(&checkpoint_id, err, attempt).await;
                }
                RetryDecision::Exhausted => {
                    error!(activity = %name, attempts = attempt, error = %err, "Activity retries exhausted");
                    return self.fail(&checkpoint_id, err, attempt).await;
                }
            }
        }
    }

    async fn fail<T>(
        &self,
        checkpoint_id: &str,
        error: ActivityError,
        attempts: u32,
    ) -> std::result::Result<T, ActivityError> {
        let outcome: RecordedOutcome<()> = RecordedOutcome::Failed {
            error: error.clone(),
            attempts,
        };
        self.record(checkpoint_id, &outcome).await?;
        Err(error)
    }

    async fn record<T: Serialize>(&self, checkpoint_id: &str, outcome: &RecordedOutcome<T>) -> Result<()> {
        let state = serde_json::to_vec(outcome)?;
        self.backend.checkpoint(checkpoint_id, &state).await?;
        Ok(())
    }

    // ========== Status ==========

    /// Store a new status projection with the instance, then publish it for
    /// this workflow id.
    ///
    /// A projection that could not be stored is never published, so readers
    /// only see values that outlive the process.
    pub async fn set_status<S: Serialize>(&self, status: &S) -> Result<()> {
        let value: Value = serde_json::to_value(status)?;
        let bytes = serde_json::to_vec(&value)?;
        self.backend.save_status(&bytes).await?;
        self.status.publish(self.workflow_id(), value);
        Ok(())
    }

    /// Last status projection published for this workflow id.
    pub fn current_status(&self) -> Option<Value> {
        self.status.latest(self.workflow_id())
    }

    // ========== Events ==========

    /// Emit a custom event exactly once per step, even across replays.
    pub async fn custom_event<P: Serialize>(&self, subtype: &str, payload: &P) -> Result<()> {
        let checkpoint_id = format!("event::{}::{}", self.next_sequence(), subtype);
        let result = self.backend.checkpoint(&checkpoint_id, b"emitted").await?;
        if result.found {
            debug!(subtype = %subtype, "Custom event already emitted, skipping");
            return Ok(());
        }
        let payload = serde_json::to_vec(payload)?;
        self.backend.send_custom_event(subtype, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;

    use planesync_core::RetryAttemptRecord;

    use crate::activity::kinds;
    use crate::backend::CheckpointResult;
    use crate::error::SdkError;
    use crate::retry::RetryPolicy;

    #[derive(Default)]
    struct MemoryBackend {
        checkpoints: Mutex<HashMap<String, Vec<u8>>>,
        retries: Mutex<Vec<(String, u32)>>,
        events: Mutex<Vec<String>>,
        statuses: Mutex<Vec<Vec<u8>>>,
        status_store_down: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SdkBackend for MemoryBackend {
        fn instance_id(&self) -> &str {
            "run-1"
        }

        fn workflow_id(&self) -> &str {
            "wf-1"
        }

        fn tenant_id(&self) -> &str {
            "tenant-1"
        }

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn checkpoint(&self, checkpoint_id: &str, state: &[u8]) -> Result<CheckpointResult> {
            let mut checkpoints = self.checkpoints.lock().unwrap();
            if let Some(existing) = checkpoints.get(checkpoint_id) {
                return Ok(CheckpointResult {
                    found: true,
                    state: existing.clone(),
                });
            }
            checkpoints.insert(checkpoint_id.to_string(), state.to_vec());
            Ok(CheckpointResult {
                found: false,
                state: Vec::new(),
            })
        }

        async fn get_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.checkpoints.lock().unwrap().get(checkpoint_id).cloned())
        }

        async fn record_retry_attempt(
            &self,
            checkpoint_id: &str,
            attempt_number: u32,
            _error_message: Option<&str>,
        ) -> Result<()> {
            self.retries
                .lock()
                .unwrap()
                .push((checkpoint_id.to_string(), attempt_number));
            Ok(())
        }

        async fn retry_attempts(&self, checkpoint_id: &str) -> Result<Vec<RetryAttemptRecord>> {
            let mut attempts: Vec<RetryAttemptRecord> = self
                .retries
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == checkpoint_id)
                .map(|(_, attempt)| RetryAttemptRecord {
                    attempt: *attempt,
                    error_message: Some(format!("call {attempt}")),
                })
                .collect();
            attempts.sort_by_key(|a| a.attempt);
            Ok(attempts)
        }

        async fn send_custom_event(&self, subtype: &str, _payload: Vec<u8>) -> Result<()> {
            self.events.lock().unwrap().push(subtype.to_string());
            Ok(())
        }

        async fn save_status(&self, projection: &[u8]) -> Result<()> {
            if self.status_store_down.load(Ordering::SeqCst) {
                return Err(SdkError::Internal("database is locked".to_string()));
            }
            self.statuses.lock().unwrap().push(projection.to_vec());
            Ok(())
        }

        async fn completed(&self, _output: &[u8]) -> Result<bool> {
            Ok(true)
        }

        async fn failed(&self, _error: &str, _error_kind: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn context(backend: &Arc<MemoryBackend>) -> WorkflowContext {
        WorkflowContext::new(backend.clone(), Arc::new(StatusBoard::new()))
    }

    fn options(maximum_attempts: u32) -> ActivityOptions {
        ActivityOptions::new(
            RetryPolicy::default()
                .with_initial_interval(Duration::from_secs(1))
                .with_maximum_interval(Duration::from_secs(30))
                .with_maximum_attempts(maximum_attempts)
                .with_non_retryable(kinds::NOT_FOUND),
        )
    }

    async fn flaky(calls: &AtomicU32, failures: u32, kind: &str) -> std::result::Result<u32, ActivityError> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= failures {
            Err(ActivityError::new(kind, format!("call {n}")))
        } else {
            Ok(n)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_follows_policy() {
        let backend = Arc::new(MemoryBackend::default());
        let ctx = context(&backend);
        let calls = AtomicU32::new(0);

        let started = tokio::time::Instant::now();
        let value = ctx
            .activity("flaky", &options(5), |_| flaky(&calls, 3, kinds::TRANSIENT))
            .await
            .unwrap();

        assert_eq!(value, 4);
        // 1s + 2s + 4s between the four attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(7_100), "{elapsed:?}");

        let retries = backend.retries.lock().unwrap().clone();
        assert_eq!(
            retries,
            vec![
                ("activity::0::flaky".to_string(), 1),
                ("activity::0::flaky".to_string(), 2),
                ("activity::0::flaky".to_string(), 3),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_maximum_attempts() {
        let backend = Arc::new(MemoryBackend::default());
        let ctx = context(&backend);
        let calls = AtomicU32::new(0);

        let err = ctx
            .activity("flaky", &options(5), |_| flaky(&calls, u32::MAX, kinds::TRANSIENT))
            .await
            .unwrap_err();

        assert_eq!(err.kind, kinds::TRANSIENT);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_without_waiting() {
        let backend = Arc::new(MemoryBackend::default());
        let ctx = context(&backend);
        let calls = AtomicU32::new(0);

        let started = tokio::time::Instant::now();
        let err = ctx
            .activity("flaky", &options(5), |_| flaky(&calls, u32::MAX, kinds::NOT_FOUND))
            .await
            .unwrap_err();

        assert_eq!(err.kind, kinds::NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(backend.retries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_returns_recorded_outcomes() {
        let backend = Arc::new(MemoryBackend::default());
        let calls = AtomicU32::new(0);

        let first = context(&backend);
        let ok: u32 = first
            .activity("step-a", &options(1), |_| flaky(&calls, 0, kinds::TRANSIENT))
            .await
            .unwrap();
        let failed = first
            .activity("step-b", &options(1), |_| flaky(&calls, u32::MAX, kinds::NOT_FOUND))
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Same body against the same checkpoints: nothing runs again.
        let replay = context(&backend);
        let ok_again: u32 = replay
            .activity("step-a", &options(1), |_| flaky(&calls, 0, kinds::TRANSIENT))
            .await
            .unwrap();
        let failed_again = replay
            .activity("step-b", &options(1), |_| flaky(&calls, 0, kinds::TRANSIENT))
            .await
            .unwrap_err();

        assert_eq!(ok_again, ok);
        assert_eq!(failed_again, failed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idempotency_key_is_stable_per_step() {
        let backend = Arc::new(MemoryBackend::default());
        let ctx = context(&backend);
        let keys = Mutex::new(Vec::new());

        let _: u32 = ctx
            .activity("first", &options(1), |attempt| {
                keys.lock().unwrap().push(attempt.idempotency_key.to_string());
                async { Ok(1) }
            })
            .await
            .unwrap();
        let _: u32 = ctx
            .activity("second", &options(1), |attempt| {
                keys.lock().unwrap().push(attempt.idempotency_key.to_string());
                async { Ok(2) }
            })
            .await
            .unwrap();

        assert_eq!(
            *keys.lock().unwrap(),
            vec!["run-1/0/first".to_string(), "run-1/1/second".to_string()]
        );
    }

    #[tokio::test]
    async fn test_custom_event_emitted_once_across_replays() {
        let backend = Arc::new(MemoryBackend::default());

        context(&backend)
            .custom_event("compensation_failed", &serde_json::json!({"n": 1}))
            .await
            .unwrap();
        context(&backend)
            .custom_event("compensation_failed", &serde_json::json!({"n": 1}))
            .await
            .unwrap();

        assert_eq!(*backend.events.lock().unwrap(), vec!["compensation_failed".to_string()]);
    }

    #[tokio::test]
    async fn test_set_status_publishes_to_board() {
        let backend = Arc::new(MemoryBackend::default());
        let ctx = context(&backend);

        ctx.set_status(&serde_json::json!({"step": "validating"}))
            .await
            .unwrap();
        assert_eq!(
            ctx.current_status(),
            Some(serde_json::json!({"step": "validating"}))
        );
        assert_eq!(backend.statuses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsaved_status_is_not_published() {
        let backend = Arc::new(MemoryBackend::default());
        let ctx = context(&backend);

        ctx.set_status(&serde_json::json!({"step": "validating"}))
            .await
            .unwrap();

        backend.status_store_down.store(true, Ordering::SeqCst);
        let err = ctx
            .set_status(&serde_json::json!({"step": "syncing_user"}))
            .await
            .unwrap_err();

        assert!(matches!(err, SdkError::Internal(_)));
        assert_eq!(
            ctx.current_status(),
            Some(serde_json::json!({"step": "validating"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_continue_after_restart() {
        let backend = Arc::new(MemoryBackend::default());
        backend.retries.lock().unwrap().extend([
            ("activity::0::flaky".to_string(), 1),
            ("activity::0::flaky".to_string(), 2),
        ]);
        let ctx = context(&backend);
        let calls = AtomicU32::new(0);
        let seen = Mutex::new(Vec::new());

        let err = ctx
            .activity("flaky", &options(5), |attempt| {
                seen.lock().unwrap().push(attempt.attempt);
                flaky(&calls, u32::MAX, kinds::TRANSIENT)
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, kinds::TRANSIENT);
        assert_eq!(*seen.lock().unwrap(), vec![3, 4, 5]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let recorded = backend
            .checkpoints
            .lock()
            .unwrap()
            .get("activity::0::flaky")
            .cloned()
            .unwrap();
        let outcome: RecordedOutcome<u32> = serde_json::from_slice(&recorded).unwrap();
        assert!(matches!(outcome, RecordedOutcome::Failed { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn test_exhausted_before_restart_does_not_call_again() {
        let backend = Arc::new(MemoryBackend::default());
        backend.retries.lock().unwrap().extend(
            (1..=3).map(|n| ("activity::0::flaky".to_string(), n)),
        );
        let ctx = context(&backend);
        let calls = AtomicU32::new(0);

        let err = ctx
            .activity("flaky", &options(3), |_| flaky(&calls, 0, kinds::TRANSIENT))
            .await
            .unwrap_err();

        assert_eq!(err.kind, kinds::TRANSIENT);
        assert_eq!(err.message, "call 3");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(backend.checkpoints.lock().unwrap().contains_key("activity::0::flaky"));
    }
}
