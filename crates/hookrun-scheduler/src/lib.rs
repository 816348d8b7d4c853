//! Job scheduling for hookrun.
//!
//! Polls the durable job store for pending work, bounds the number of jobs
//! processing at once, and dispatches each job to an action executor while
//! holding an exclusive lock on the job's work directory.

pub mod dispatch;
pub mod error;
pub mod lock;
pub mod quota;
pub mod queue;
pub mod scheduler;
pub mod workdir;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{LockError, SchedulerError, SchedulerResult};
pub use lock::{LockGuard, LockInfo, LockTable};
pub use quota::{CleanupReport, DirUsage};
pub use queue::JobQueue;
pub use scheduler::{JobHandler, Scheduler, SchedulerOptions};
pub use workdir::WorkDirManager;
