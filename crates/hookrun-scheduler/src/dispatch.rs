//! Dispatch glue between the scheduler, work directories and executors.
//!
//! For every job: lock the work directory (requeue on contention), make sure
//! the directory exists, open the job log, run the executor, report the
//! outcome. The lock is released on every path out of [`Dispatcher::dispatch`].

use async_trait::async_trait;
use futures::FutureExt;
use hookrun_core::executor::{ActionContext, ActionExecutor, JobLog};
use hookrun_core::{ActionConfig, ActionKind, Error, Job};
use hookrun_db::DbResult;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::queue::JobQueue;
use crate::scheduler::JobHandler;
use crate::workdir::WorkDirManager;
use crate::LockError;

/// What happened to a dispatched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Failed { message: String },
    /// The work directory was busy; the job went back to pending.
    Requeued,
}

/// Runs claimed jobs against their configured actions.
pub struct Dispatcher {
    queue: JobQueue,
    workdirs: Arc<WorkDirManager>,
    logs_dir: PathBuf,
    actions: HashMap<String, ActionConfig>,
    executors: HashMap<ActionKind, Arc<dyn ActionExecutor>>,
    dry_run: bool,
}

impl Dispatcher {
    pub fn new(queue: JobQueue, workdirs: Arc<WorkDirManager>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            queue,
            workdirs,
            logs_dir: logs_dir.into(),
            actions: HashMap::new(),
            executors: HashMap::new(),
            dry_run: false,
        }
    }

    pub fn with_actions(mut self, actions: impl IntoIterator<Item = ActionConfig>) -> Self {
        self.actions
            .extend(actions.into_iter().map(|a| (a.name.clone(), a)));
        self
    }

    pub fn with_executor(mut self, kind: ActionKind, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    /// Route every job through `execute_dry_run`.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Path of the execution log for `job`.
    pub fn log_path(&self, job: &Job) -> PathBuf {
        self.logs_dir
            .join(&job.action_name)
            .join(format!("job-{}.log", job.id))
    }

    /// Dispatch one processing job and record its outcome.
    ///
    /// Only job store failures are returned as errors; everything that goes
    /// wrong with the job itself ends up in its record.
    pub async fn dispatch(&self, job: Job) -> DbResult<DispatchOutcome> {
        let work_dir = self.workdirs.work_dir_for_event(&job.event);

        let _lock = match self.workdirs.acquire_lock(&work_dir, job.id) {
            Ok(guard) => guard,
            Err(LockError::Held { owner, .. }) => {
                info!(
                    job_id = %job.id,
                    owner = %owner,
                    path = %work_dir.display(),
                    "Work directory busy, requeueing job"
                );
                self.queue.reset_to_pending(job.id).await?;
                return Ok(DispatchOutcome::Requeued);
            }
        };

        let (result, log_file) = self.run(&job, &work_dir).await;
        match result {
            Ok(()) => {
                self.queue
                    .mark_completed(job.id, log_file.as_deref())
                    .await?;
                Ok(DispatchOutcome::Completed)
            }
            Err(RunError::Job(e)) => {
                let message = failure_message(&e);
                self.queue
                    .mark_failed(job.id, &message, log_file.as_deref())
                    .await?;
                Ok(DispatchOutcome::Failed { message })
            }
            Err(RunError::Store(e)) => Err(e),
        }
    }

    /// Prepare and execute; returns the log path once one exists.
    async fn run(&self, job: &Job, work_dir: &Path) -> (Result<(), RunError>, Option<PathBuf>) {
        if let Err(e) = self.workdirs.ensure_work_dir(work_dir).await {
            return (Err(RunError::Job(Error::Io(e))), None);
        }

        let log_path = self.log_path(job);
        let log = match JobLog::create(&log_path) {
            Ok(log) => log,
            Err(e) => return (Err(RunError::Job(e)), None),
        };
        if let Err(e) = self.queue.set_log_file(job.id, &log_path).await {
            return (Err(RunError::Store(e)), Some(log_path));
        }

        let result = self.execute(job, work_dir, &log).await;
        let note = match &result {
            Ok(()) => log.system("job completed"),
            Err(e) => log.system(format!("job failed: {}", e)),
        };
        if let Err(e) = note {
            warn!(job_id = %job.id, error = %e, "Failed to write job log");
        }
        (result.map_err(RunError::Job), Some(log_path))
    }

    async fn execute(&self, job: &Job, work_dir: &Path, log: &JobLog) -> hookrun_core::Result<()> {
        let action = self.actions.get(&job.action_name).ok_or_else(|| {
            Error::NotFound(format!("action '{}' is not configured", job.action_name))
        })?;
        let executor = self.executors.get(&action.kind()).ok_or_else(|| {
            Error::InvalidInput(format!(
                "no executor registered for action kind {}",
                action.kind()
            ))
        })?;

        let repository_dir = WorkDirManager::repository_dir(work_dir);
        let ctx = ActionContext {
            job_id: job.id,
            action,
            event: &job.event,
            repository_dir: &repository_dir,
        };

        info!(
            job_id = %job.id,
            action = %action.name,
            executor = executor.name(),
            dry_run = self.dry_run,
            path = %work_dir.display(),
            "Executing action"
        );
        log.system(format!(
            "job {} action '{}' ({}) in {}",
            job.id,
            action.name,
            action.kind(),
            repository_dir.display()
        ))?;

        let run = async {
            if self.dry_run {
                executor.execute_dry_run(ctx, log).await
            } else {
                executor.execute(ctx, log).await
            }
        };
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(job_id = %job.id, reason = %reason, "Executor panicked");
                Err(Error::ExecutionFailed(format!("executor panicked: {}", reason)))
            }
        }
    }
}

enum RunError {
    Job(Error),
    Store(hookrun_db::DbError),
}

/// Message recorded on a failed job.
fn failure_message(error: &Error) -> String {
    match error {
        Error::ExecutionFailed(message) => message.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl JobHandler for Dispatcher {
    async fn handle(&self, job: Job) {
        let job_id = job.id;
        if let Err(e) = self.dispatch(job).await {
            error!(job_id = %job_id, error = %e, "Failed to record job outcome");
            // A job left processing would hold no slot but still count as
            // running until the next restart.
            let message = format!("failed to record job outcome: {}", e);
            if let Err(e) = self.queue.mark_failed(job_id, &message, None).await {
                error!(job_id = %job_id, error = %e, "Job left processing until restart");
            }
        }
    }
}
