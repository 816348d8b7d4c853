//! Executor trait and execution logs.
//!
//! Executors run a configured action against the repository checkout of a
//! work directory. The dispatcher only calls them while holding the work
//! directory lock, and always with a per-job log already open.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{ActionConfig, Event, JobId, Result};

/// Everything an executor needs to know about one job.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub job_id: JobId,
    pub action: &'a ActionConfig,
    pub event: &'a Event,
    /// The `repository` directory inside the job's work directory.
    pub repository_dir: &'a Path,
}

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

impl LogStream {
    fn marker(&self) -> &'static str {
        match self {
            LogStream::Stdout => " ",
            LogStream::Stderr => "!",
            LogStream::System => "*",
        }
    }
}

/// Append-only execution log for a single job.
///
/// Writes are small blocking appends made inline from async tasks.
pub struct JobLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JobLog {
    /// Open (or create) the log file, creating parent directories as needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, line: &LogLine) -> Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| crate::Error::Internal("job log mutex poisoned".to_string()))?;
        writeln!(
            file,
            "{} [{}] {}",
            line.timestamp.to_rfc3339(),
            line.stream.marker(),
            line.content
        )?;
        Ok(())
    }

    /// Write a line with the current timestamp.
    pub fn line(&self, stream: LogStream, content: impl Into<String>) -> Result<()> {
        self.write(&LogLine {
            timestamp: Utc::now(),
            stream,
            content: content.into(),
        })
    }

    /// Write a system message.
    pub fn system(&self, content: impl Into<String>) -> Result<()> {
        self.line(LogStream::System, content)
    }
}

impl std::fmt::Debug for JobLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLog").field("path", &self.path).finish()
    }
}

/// Trait for action executors.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Run the action. An `Err` marks the job as failed.
    async fn execute(&self, ctx: ActionContext<'_>, log: &JobLog) -> Result<()>;

    /// Describe what `execute` would do without side effects.
    async fn execute_dry_run(&self, ctx: ActionContext<'_>, log: &JobLog) -> Result<()>;
}
