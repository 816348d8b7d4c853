//! Scheduler error types.

use hookrun_core::JobId;
use hookrun_db::DbError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job store error: {0}")]
    Db(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// A work directory could not be locked.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("work directory {} is locked by job {owner}", .path.display())]
    Held { path: PathBuf, owner: JobId },
}
