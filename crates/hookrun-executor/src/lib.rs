//! Action executors for hookrun.
//!
//! Provides executor implementations that run actions as local processes:
//! - `shell` actions through `sh -c`
//! - `script` actions through an interpreter
//!
//! Agent actions are executed by an external runtime and have no in-tree
//! executor.

mod process;
pub mod script;
pub mod shell;

pub use hookrun_core::executor::{ActionContext, ActionExecutor, JobLog, LogLine, LogStream};
pub use script::ScriptExecutor;
pub use shell::ShellExecutor;
