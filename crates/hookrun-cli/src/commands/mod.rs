//! CLI command implementations.

pub mod jobs;
pub mod serve;

use anyhow::{Context, Result};
use hookrun_config::{HookrunConfig, load_config};
use hookrun_core::Event;
use hookrun_db::{SqliteJobRepo, create_pool, run_migrations};
use hookrun_scheduler::{JobQueue, WorkDirManager, quota::bytes_to_gb};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Load the configuration, falling back to defaults when the file is absent.
pub fn load_settings(path: &Path) -> Result<HookrunConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "Configuration file not found, using defaults");
        return Ok(HookrunConfig::default());
    }
    load_config(path).with_context(|| format!("Failed to load config: {}", path.display()))
}

/// Open the job store and run pending migrations.
pub async fn open_queue(config: &HookrunConfig) -> Result<JobQueue> {
    let pool = create_pool(&config.database.url)
        .await
        .with_context(|| format!("Failed to open database: {}", config.database.url))?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    Ok(JobQueue::new(Arc::new(SqliteJobRepo::new(pool))))
}

/// Read an event file. With `kind`, the file holds a raw payload.
pub fn read_event(path: &Path, kind: Option<String>) -> Result<Event> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file: {}", path.display()))?;
    let event = match kind {
        Some(kind) => {
            let payload = serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?;
            Event::from_payload(kind, payload)
        }
        None => serde_json::from_str(&content).with_context(|| {
            format!(
                "{} is not an event (expected kind and payload, or pass --kind)",
                path.display()
            )
        })?,
    };
    Ok(event)
}

pub async fn enqueue(config_path: &Path, action: &str, event_path: &Path, kind: Option<String>) -> Result<()> {
    let config = load_settings(config_path)?;
    if config.action(action).is_none() {
        warn!(action = %action, "Action is not configured; the job will fail when dispatched");
    }
    let event = read_event(event_path, kind)?;
    let queue = open_queue(&config).await?;
    let id = queue.enqueue(action, &event).await?;
    println!("{}", id);
    Ok(())
}

pub async fn cleanup(config_path: &Path) -> Result<()> {
    let config = load_settings(config_path)?;
    let manager = WorkDirManager::new(config.work_directory);
    let report = manager
        .check_and_cleanup()
        .await
        .with_context(|| format!("Failed to scan {}", manager.base_path().display()))?;

    println!(
        "Usage: {:.2} GB (threshold {:.2} GB)",
        bytes_to_gb(report.usage_before),
        bytes_to_gb(manager.threshold_bytes())
    );
    if !report.triggered {
        println!("Below threshold, nothing removed");
        return Ok(());
    }
    for path in &report.removed {
        println!("  removed {}", path.display());
    }
    for path in &report.failed {
        println!("  failed  {}", path.display());
    }
    println!("Usage after cleanup: {:.2} GB", bytes_to_gb(report.usage_after));
    Ok(())
}

pub fn validate(path: &Path) -> Result<()> {
    match load_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  actions: {}", config.actions.len());
            for action in &config.actions {
                println!("    {} ({})", action.name, action.kind());
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
