//! Job commands.

use anyhow::{Context, Result};
use hookrun_core::{Job, JobId, JobState};
use std::path::Path;

use super::{load_settings, open_queue};

pub async fn list(config_path: &Path, state: Option<JobState>, limit: u32) -> Result<()> {
    let config = load_settings(config_path)?;
    let queue = open_queue(&config).await?;
    let jobs = queue.repo().list(state, i64::from(limit)).await?;

    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    println!("{:>6}  {:<10}  {:<24}  {:<20}  UPDATED", "ID", "STATE", "ACTION", "EVENT");
    for job in &jobs {
        println!(
            "{:>6}  {:<10}  {:<24}  {:<20}  {}",
            job.id,
            job.state,
            job.action_name,
            job.event.kind,
            job.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn show(config_path: &Path, id: JobId) -> Result<()> {
    let config = load_settings(config_path)?;
    let queue = open_queue(&config).await?;
    let job = queue
        .repo()
        .get(id)
        .await
        .with_context(|| format!("Failed to load job {}", id))?;
    print!("{}", describe(&job));
    Ok(())
}

pub async fn purge(config_path: &Path, days: Option<u32>) -> Result<()> {
    let config = load_settings(config_path)?;
    let days = days.unwrap_or(config.queue.retention_days);
    let queue = open_queue(&config).await?;
    let purged = queue.purge_finished(days).await?;
    println!("Purged {} finished jobs older than {} days", purged, days);
    Ok(())
}

fn describe(job: &Job) -> String {
    let mut out = format!(
        "Job {}\n  action:  {}\n  state:   {}\n  event:   {} ({})\n  created: {}\n  updated: {}\n",
        job.id,
        job.action_name,
        job.state,
        job.event.id,
        job.event.kind,
        job.created_at.to_rfc3339(),
        job.updated_at.to_rfc3339(),
    );
    if let Some(log) = &job.log_file {
        out.push_str(&format!("  log:     {}\n", log.display()));
    }
    if let Some(error) = &job.error_message {
        out.push_str(&format!("  error:   {}\n", error));
    }
    out
}
