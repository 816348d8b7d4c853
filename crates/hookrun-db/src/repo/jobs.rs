//! Job repository.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hookrun_core::{Event, Job, JobId, JobState};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

use crate::{DbError, DbResult};

/// A job row as stored in the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub action_name: String,
    pub event_json: String,
    pub status: String,
    pub log_file: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<JobRecord> for Job {
    type Error = DbError;

    fn try_from(record: JobRecord) -> DbResult<Self> {
        let state = record
            .status
            .parse::<JobState>()
            .map_err(|e| DbError::CorruptRow(format!("job {}: {}", record.id, e)))?;
        Ok(Job {
            id: JobId::new(record.id),
            action_name: record.action_name,
            event: serde_json::from_str(&record.event_json)?,
            state,
            log_file: record.log_file.map(PathBuf::from),
            error_message: record.error_message,
            created_at: from_millis(record.id, record.created_at)?,
            updated_at: from_millis(record.id, record.updated_at)?,
        })
    }
}

fn from_millis(id: i64, millis: i64) -> DbResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| DbError::CorruptRow(format!("job {}: bad timestamp {}", id, millis)))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn path_text(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Durably insert a pending job.
    async fn enqueue(&self, action_name: &str, event: &Event) -> DbResult<JobId>;

    async fn get(&self, id: JobId) -> DbResult<Job>;

    /// Most recent jobs first, optionally filtered by state.
    async fn list(&self, state: Option<JobState>, limit: i64) -> DbResult<Vec<Job>>;

    async fn count(&self, state: JobState) -> DbResult<i64>;

    /// Move up to `limit` of the oldest pending jobs to processing and return
    /// them ordered by id.
    ///
    /// A claimed row that cannot be decoded is marked failed and left out of
    /// the result.
    async fn claim_pending(&self, limit: i64) -> DbResult<Vec<Job>>;

    /// Record the execution log of a processing job.
    async fn set_log_file(&self, id: JobId, log_file: &Path) -> DbResult<()>;

    /// Processing -> Completed. Returns false if the job was not processing.
    async fn mark_completed(&self, id: JobId, log_file: Option<&Path>) -> DbResult<bool>;

    /// Processing -> Failed. Returns false if the job was not processing.
    async fn mark_failed(
        &self,
        id: JobId,
        error_message: &str,
        log_file: Option<&Path>,
    ) -> DbResult<bool>;

    /// Processing -> Pending. Returns false if the job was not processing.
    async fn reset_to_pending(&self, id: JobId) -> DbResult<bool>;

    /// Reset every processing job to pending. Used at startup, when no
    /// dispatch can still be running.
    async fn reset_processing(&self) -> DbResult<u64>;

    /// Delete completed and failed jobs last updated before `cutoff`.
    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;
}

/// SQLite implementation of JobRepo.
#[derive(Clone)]
pub struct SqliteJobRepo {
    pool: SqlitePool,
}

impl SqliteJobRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobRepo for SqliteJobRepo {
    async fn enqueue(&self, action_name: &str, event: &Event) -> DbResult<JobId> {
        let event_json = serde_json::to_string(event)?;
        let now = now_millis();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (action_name, event_json, status, created_at, updated_at)
            VALUES (?, ?, 'pending', ?, ?)
            RETURNING id
            "#,
        )
        .bind(action_name)
        .bind(event_json)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(JobId::new(id))
    }

    async fn get(&self, id: JobId) -> DbResult<Job> {
        let record = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        record.try_into()
    }

    async fn list(&self, state: Option<JobState>, limit: i64) -> DbResult<Vec<Job>> {
        let records = match state {
            Some(state) => {
                sqlx::query_as::<_, JobRecord>(
                    "SELECT * FROM jobs WHERE status = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(state.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs ORDER BY id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        records.into_iter().map(Job::try_from).collect()
    }

    async fn count(&self, state: JobState) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn claim_pending(&self, limit: i64) -> DbResult<Vec<Job>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let mut records = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE jobs
            SET status = 'processing', updated_at = ?
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY id ASC
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(now_millis())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        // RETURNING order is unspecified.
        records.sort_by_key(|r| r.id);

        let mut jobs = Vec::with_capacity(records.len());
        for record in records {
            let id = JobId::new(record.id);
            match Job::try_from(record) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Unreadable job row, marking failed");
                    self.mark_failed(id, &format!("unreadable job record: {}", e), None)
                        .await?;
                }
            }
        }
        Ok(jobs)
    }

    async fn set_log_file(&self, id: JobId, log_file: &Path) -> DbResult<()> {
        sqlx::query("UPDATE jobs SET log_file = ?, updated_at = ? WHERE id = ?")
            .bind(path_text(Some(log_file)))
            .bind(now_millis())
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_completed(&self, id: JobId, log_file: Option<&Path>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', log_file = COALESCE(?, log_file), updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(path_text(log_file))
        .bind(now_millis())
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        id: JobId,
        error_message: &str,
        log_file: Option<&Path>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error_message = ?, log_file = COALESCE(?, log_file),
                updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(error_message)
        .bind(path_text(log_file))
        .bind(now_millis())
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_to_pending(&self, id: JobId) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', updated_at = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(now_millis())
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_processing(&self) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', updated_at = ? WHERE status = 'processing'",
        )
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND updated_at < ?",
        )
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "Purged finished jobs");
        }
        Ok(purged)
    }
}
