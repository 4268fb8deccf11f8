// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{debug, info};

use crate::error::CoreError;

use super::{CheckpointRecord, EventRecord, InstanceRecord, Persistence, RetryAttemptRecord};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqlitePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePersistence")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The pool is expected to be migrated already; see [`SqlitePersistence::migrate`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/planesync.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::migrate(&pool).await?;
        info!(path = %path.display(), "SQLite database opened");

        Ok(Self { pool })
    }

    /// Open a private in-memory database. Everything is lost when the value is dropped.
    pub async fn in_memory() -> Result<Self, CoreError> {
        // A single long-lived connection; each new connection would see an empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: e.to_string(),
            })?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    /// Open the database named by a configuration value.
    ///
    /// Accepts `sqlite::memory:` or a plain file path (an optional `sqlite:` /
    /// `sqlite://` prefix is stripped).
    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        if database_url == "sqlite::memory:" || database_url == ":memory:" {
            return Self::in_memory().await;
        }

        let path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);
        let path = path.split('?').next().unwrap_or(path);

        Self::from_path(path).await
    }

    /// Apply all pending migrations. Safe to call multiple times.
    pub async fn migrate(pool: &SqlitePool) -> Result<(), CoreError> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn register_instance(
        &self,
        instance_id: &str,
        workflow_id: &str,
        workflow_type: &str,
        tenant_id: &str,
        input: &[u8],
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO instances (instance_id, workflow_id, workflow_type, tenant_id, status, input, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(instance_id)
        .bind(workflow_id)
        .bind(workflow_type)
        .bind(tenant_id)
        .bind(input)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db)
                if db.is_unique_violation() && db.message().contains("workflow_id") =>
            {
                CoreError::InstanceAlreadyRunning {
                    workflow_id: workflow_id.to_string(),
                }
            }
            other => other.into(),
        })?;

        Ok(())
    }

    async fn enqueue_instance(
        &self,
        instance_id: &str,
        workflow_id: &str,
        workflow_type: &str,
        tenant_id: &str,
        input: &[u8],
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO instances (instance_id, workflow_id, workflow_type, tenant_id, status, input, created_at)
            VALUES (?, ?, ?, ?, 'queued', ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(instance_id)
        .bind(workflow_id)
        .bind(workflow_type)
        .bind(tenant_id)
        .bind(input)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError> {
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT instance_id, workflow_id, workflow_type, tenant_id, status, checkpoint_id,
                   input, output, error, error_kind, status_projection,
                   created_at, started_at, finished_at
            FROM instances
            WHERE instance_id = ?
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn latest_instance(
        &self,
        workflow_id: &str,
    ) -> Result<Option<InstanceRecord>, CoreError> {
        // rowid breaks ties within CURRENT_TIMESTAMP's one-second resolution
        let record = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT instance_id, workflow_id, workflow_type, tenant_id, status, checkpoint_id,
                   input, output, error, error_kind, status_projection,
                   created_at, started_at, finished_at
            FROM instances
            WHERE workflow_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn update_instance_status(
        &self,
        instance_id: &str,
        status: &str,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = ?1,
                started_at = COALESCE(?2, started_at)
            WHERE instance_id = ?3
            "#,
        )
        .bind(status)
        .bind(started_at)
        .bind(instance_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db)
                if db.is_unique_violation() && db.message().contains("workflow_id") =>
            {
                CoreError::InvalidInstanceState {
                    instance_id: instance_id.to_string(),
                    expected: "no other in-flight instance".to_string(),
                    actual: status.to_string(),
                }
            }
            other => other.into(),
        })?;

        if result.rows_affected() == 0 {
            return Err(CoreError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            });
        }

        Ok(())
    }

    async fn update_instance_checkpoint(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE instances
            SET checkpoint_id = ?
            WHERE instance_id = ?
            "#,
        )
        .bind(checkpoint_id)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_status_projection(
        &self,
        instance_id: &str,
        projection: &[u8],
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE instances
            SET status_projection = ?1
            WHERE instance_id = ?2
            "#,
        )
        .bind(projection)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_instance_if_running(
        &self,
        instance_id: &str,
        status: &str,
        output: Option<&[u8]>,
        error: Option<&str>,
        error_kind: Option<&str>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = ?1,
                finished_at = CURRENT_TIMESTAMP,
                output = ?2,
                error = ?3,
                error_kind = ?4
            WHERE instance_id = ?5
              AND status = 'running'
            "#,
        )
        .bind(status)
        .bind(output)
        .bind(error)
        .bind(error_kind)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if !updated {
            debug!(instance_id, status, "Instance not running, terminal record skipped");
        }
        Ok(updated)
    }

    async fn save_checkpoint(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
        state: &[u8],
    ) -> Result<(), CoreError> {
        // First write wins; a replayed step never overwrites a recorded outcome.
        sqlx::query(
            r#"
            INSERT INTO checkpoints (instance_id, checkpoint_id, state, created_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (instance_id, checkpoint_id) DO NOTHING
            "#,
        )
        .bind(instance_id)
        .bind(checkpoint_id)
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::CheckpointSaveFailed {
            instance_id: instance_id.to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    async fn load_checkpoint(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointRecord>, CoreError> {
        let record = sqlx::query_as::<_, CheckpointRecord>(
            r#"
            SELECT id, instance_id, checkpoint_id, state, created_at
            FROM checkpoints
            WHERE instance_id = ? AND checkpoint_id = ?
            "#,
        )
        .bind(instance_id)
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_checkpoints(
        &self,
        instance_id: &str,
    ) -> Result<Vec<CheckpointRecord>, CoreError> {
        let rows = sqlx::query_as::<_, CheckpointRecord>(
            r#"
            SELECT id, instance_id, checkpoint_id, state, created_at
            FROM checkpoints
            WHERE instance_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_event(&self, event: &EventRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO instance_events (instance_id, event_type, checkpoint_id, payload, created_at, subtype)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP, ?)
            "#,
        )
        .bind(&event.instance_id)
        .bind(&event.event_type)
        .bind(&event.checkpoint_id)
        .bind(&event.payload)
        .bind(&event.subtype)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_events(
        &self,
        instance_id: &str,
        event_type: Option<&str>,
    ) -> Result<Vec<EventRecord>, CoreError> {
        let rows = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT id, instance_id, event_type, checkpoint_id, payload, created_at, subtype
            FROM instance_events
            WHERE instance_id = ?1
              AND (?2 IS NULL OR event_type = ?2)
            ORDER BY id ASC
            "#,
        )
        .bind(instance_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn save_retry_attempt(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
        attempt: i32,
        error_message: Option<&str>,
    ) -> Result<(), CoreError> {
        let retry_checkpoint_id = format!("{}::retry::{}", checkpoint_id, attempt);

        sqlx::query(
            r#"
            INSERT INTO checkpoints (instance_id, checkpoint_id, state, created_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (instance_id, checkpoint_id) DO NOTHING
            "#,
        )
        .bind(instance_id)
        .bind(&retry_checkpoint_id)
        .bind(error_message.unwrap_or("").as_bytes())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_retry_attempts(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<RetryAttemptRecord>, CoreError> {
        let prefix = format!("{}::retry::", checkpoint_id);

        let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
            r#"
            SELECT checkpoint_id, state
            FROM checkpoints
            WHERE instance_id = ?1
              AND substr(checkpoint_id, 1, length(?2)) = ?2
            "#,
        )
        .bind(instance_id)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;

        let mut attempts: Vec<RetryAttemptRecord> = rows
            .into_iter()
            .filter_map(|(id, state)| {
                let attempt = id.strip_prefix(&prefix)?.parse().ok()?;
                let error_message = String::from_utf8(state).ok().filter(|m| !m.is_empty());
                Some(RetryAttemptRecord {
                    attempt,
                    error_message,
                })
            })
            .collect();
        attempts.sort_by_key(|a| a.attempt);

        Ok(attempts)
    }

    async fn list_recoverable_instances(
        &self,
        workflow_type: &str,
    ) -> Result<Vec<InstanceRecord>, CoreError> {
        let records = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT instance_id, workflow_id, workflow_type, tenant_id, status, checkpoint_id,
                   input, output, error, error_kind, status_projection,
                   created_at, started_at, finished_at
            FROM instances
            WHERE workflow_type = ?
              AND status IN ('queued', 'pending', 'running')
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(workflow_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let result: Result<(i64,), _> = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }

    async fn count_active_instances(&self) -> Result<i64, CoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM instances
            WHERE status IN ('pending', 'running')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }
}
