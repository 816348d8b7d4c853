//! Poll loop that moves pending jobs to dispatchers.

use async_trait::async_trait;
use hookrun_config::QueueConfig;
use hookrun_core::Job;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::queue::JobQueue;
use crate::SchedulerResult;

/// Interval between retention sweeps.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Receives jobs the scheduler has moved to processing.
///
/// Each call must end with exactly one of `mark_completed`, `mark_failed` or
/// `reset_to_pending` on the queue.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job);
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of jobs processing at once.
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    pub retention_days: u32,
}

impl From<&QueueConfig> for SchedulerOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent.max(1),
            poll_interval: config.poll_interval,
            retention_days: config.retention_days,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

/// Polls the queue and hands jobs to a [`JobHandler`], at most
/// `max_concurrent` at a time.
///
/// The cap is enforced by a semaphore: a permit is taken before a job is
/// claimed and held until its handler returns.
pub struct Scheduler {
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    options: SchedulerOptions,
    slots: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(queue: JobQueue, handler: Arc<dyn JobHandler>, mut options: SchedulerOptions) -> Self {
        options.max_concurrent = options.max_concurrent.max(1);
        let slots = Arc::new(Semaphore::new(options.max_concurrent));
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            handler,
            options,
            slots,
            shutdown,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Number of jobs currently being dispatched.
    pub fn in_flight(&self) -> usize {
        self.options.max_concurrent - self.slots.available_permits()
    }

    /// A receiver that flips to `true` when processing stops.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Recover orphaned jobs, then poll until [`stop_processing`] is called.
    ///
    /// The returned task resolves to an error if the job store fails; per-job
    /// failures never end the loop.
    ///
    /// [`stop_processing`]: Scheduler::stop_processing
    pub fn start_processing(self: &Arc<Self>) -> JoinHandle<SchedulerResult<()>> {
        let scheduler = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            scheduler.queue.recover_orphans().await?;
            info!(
                max_concurrent = scheduler.options.max_concurrent,
                poll_interval_secs = scheduler.options.poll_interval.as_secs_f64(),
                "Starting job processing"
            );

            let mut ticker = tokio::time::interval(scheduler.options.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.poll_once().await {
                            error!(error = %e, "Job store failure, stopping poll loop");
                            return Err(e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Job processing stopped");
            Ok(())
        })
    }

    /// Claim as many pending jobs as there are free slots and dispatch them
    /// without waiting for them to finish. Returns the number dispatched.
    pub async fn poll_once(&self) -> SchedulerResult<usize> {
        let mut permits = Vec::new();
        while let Ok(permit) = self.slots.clone().try_acquire_owned() {
            permits.push(permit);
        }
        if permits.is_empty() {
            debug!("All job slots busy");
            return Ok(0);
        }

        let jobs = self.queue.claim(permits.len()).await?;
        let dispatched = jobs.len();
        for (job, permit) in jobs.into_iter().zip(permits) {
            let handler = self.handler.clone();
            let queue = self.queue.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let job_id = job.id;
                // Run the handler in its own task so a panic still frees the
                // slot and leaves a terminal record.
                let result = tokio::spawn(async move { handler.handle(job).await }).await;
                if let Err(e) = result {
                    error!(job_id = %job_id, error = %e, "Job handler panicked");
                    if let Err(e) = queue
                        .mark_failed(job_id, &format!("job handler panicked: {}", e), None)
                        .await
                    {
                        error!(job_id = %job_id, error = %e, "Failed to record handler panic");
                    }
                }
            });
        }
        if dispatched > 0 {
            debug!(dispatched, in_flight = self.in_flight(), "Dispatched jobs");
        }
        Ok(dispatched)
    }

    /// Stop scheduling new work. Jobs already dispatched keep running.
    pub fn stop_processing(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait until no job is being dispatched.
    pub async fn wait_idle(&self) {
        let total = self.options.max_concurrent as u32;
        // The semaphore is never closed, so this only waits.
        if let Ok(all) = self.slots.acquire_many(total).await {
            drop(all);
        }
    }

    /// Purge finished jobs older than the retention period now and once a day
    /// until processing stops.
    pub fn start_retention_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler
                            .queue
                            .purge_finished(scheduler.options.retention_days)
                            .await
                        {
                            error!(error = %e, "Retention sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
