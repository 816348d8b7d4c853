//! Long-running scheduler process.

use anyhow::{Context, Result};
use hookrun_core::ActionKind;
use hookrun_executor::{ScriptExecutor, ShellExecutor};
use hookrun_scheduler::{Dispatcher, Scheduler, SchedulerOptions, WorkDirManager};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use super::{load_settings, open_queue};

/// Run the scheduler, retention sweep and quota monitor until Ctrl-C.
pub async fn serve(config_path: &Path) -> Result<()> {
    let config = load_settings(config_path)?;
    let queue = open_queue(&config).await?;
    info!(database = %config.database.url, "Job store ready");

    std::fs::create_dir_all(&config.work_directory.base_path).with_context(|| {
        format!(
            "Failed to create work directory base: {}",
            config.work_directory.base_path.display()
        )
    })?;
    let workdirs = Arc::new(WorkDirManager::new(config.work_directory.clone()));

    // Relative script paths are resolved against the config file's directory.
    let script_root = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let dispatcher = Dispatcher::new(queue.clone(), workdirs.clone(), &config.logs.dir)
        .with_actions(config.actions.iter().cloned())
        .with_executor(ActionKind::Shell, Arc::new(ShellExecutor::new()))
        .with_executor(
            ActionKind::Script,
            Arc::new(ScriptExecutor::with_script_root(script_root)),
        )
        .with_dry_run(config.dry_run);

    let scheduler = Arc::new(Scheduler::new(
        queue,
        Arc::new(dispatcher),
        SchedulerOptions::from(&config.queue),
    ));

    let mut processing = scheduler.start_processing();
    let retention = scheduler.start_retention_sweep();
    let monitor = workdirs.start_monitoring(scheduler.shutdown_signal());

    info!(
        actions = config.actions.len(),
        max_concurrent = config.queue.max_concurrent,
        dry_run = config.dry_run,
        "hookrun started"
    );

    // The poll loop only ends on its own after a job store failure.
    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down, waiting for running jobs");
            None
        }
        result = &mut processing => Some(result),
    };

    scheduler.stop_processing();
    scheduler.wait_idle().await;
    let _ = retention.await;
    let _ = monitor.await;

    let result = match finished {
        Some(result) => result,
        None => processing.await,
    };
    match result {
        Ok(Ok(())) => {
            info!("Scheduler stopped");
            Ok(())
        }
        Ok(Err(e)) => Err(e).context("Scheduler failed"),
        Err(e) => Err(e).context("Scheduler task panicked"),
    }
}
