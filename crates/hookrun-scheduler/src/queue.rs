//! Durable job queue backed by the job store.
//!
//! Wraps a [`JobRepo`] with the outcome calls dispatchers make and the
//! logging around them. Store errors are returned to the caller and never
//! retried here.

use chrono::Utc;
use hookrun_core::{Event, Job, JobId};
use hookrun_db::{DbResult, JobRepo};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Job queue backed by a job repository.
#[derive(Clone)]
pub struct JobQueue {
    repo: Arc<dyn JobRepo>,
}

impl JobQueue {
    pub fn new(repo: Arc<dyn JobRepo>) -> Self {
        Self { repo }
    }

    /// The underlying store, for read-only queries.
    pub fn repo(&self) -> &Arc<dyn JobRepo> {
        &self.repo
    }

    /// Enqueue a new job. The row is committed before this returns.
    ///
    /// Whether `action_name` is configured is not checked here.
    pub async fn enqueue(&self, action_name: &str, event: &Event) -> DbResult<JobId> {
        let id = self.repo.enqueue(action_name, event).await?;
        info!(job_id = %id, action = %action_name, event_id = %event.id, "Enqueued job");
        Ok(id)
    }

    /// Claim up to `limit` of the oldest pending jobs.
    pub async fn claim(&self, limit: usize) -> DbResult<Vec<Job>> {
        let jobs = self.repo.claim_pending(limit as i64).await?;
        for job in &jobs {
            debug!(job_id = %job.id, action = %job.action_name, "Claimed job");
        }
        Ok(jobs)
    }

    /// Record where the job's execution log lives.
    pub async fn set_log_file(&self, job_id: JobId, log_file: &Path) -> DbResult<()> {
        self.repo.set_log_file(job_id, log_file).await
    }

    /// Mark a job as completed.
    pub async fn mark_completed(&self, job_id: JobId, log_file: Option<&Path>) -> DbResult<()> {
        if self.repo.mark_completed(job_id, log_file).await? {
            info!(job_id = %job_id, "Job completed");
        } else {
            warn!(job_id = %job_id, "Ignoring completion of job that is not processing");
        }
        Ok(())
    }

    /// Mark a job as failed.
    pub async fn mark_failed(
        &self,
        job_id: JobId,
        error_message: &str,
        log_file: Option<&Path>,
    ) -> DbResult<()> {
        if self.repo.mark_failed(job_id, error_message, log_file).await? {
            warn!(job_id = %job_id, error = %error_message, "Job failed");
        } else {
            warn!(job_id = %job_id, "Ignoring failure of job that is not processing");
        }
        Ok(())
    }

    /// Release a claimed job back to pending without recording a failure.
    pub async fn reset_to_pending(&self, job_id: JobId) -> DbResult<()> {
        if self.repo.reset_to_pending(job_id).await? {
            debug!(job_id = %job_id, "Job requeued");
        } else {
            debug!(job_id = %job_id, "Job was not processing, requeue skipped");
        }
        Ok(())
    }

    /// Reset jobs left processing by a previous run. Their locks died with
    /// that process, so they are safe to dispatch again.
    pub async fn recover_orphans(&self) -> DbResult<u64> {
        let recovered = self.repo.reset_processing().await?;
        if recovered > 0 {
            warn!(recovered, "Reset orphaned processing jobs to pending");
        }
        Ok(recovered)
    }

    /// Delete finished jobs older than `retention_days`.
    pub async fn purge_finished(&self, retention_days: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        self.repo.purge_finished_before(cutoff).await
    }
}
