//! KDL configuration parsing for hookrun.
//!
//! This crate handles parsing of:
//! - Queue and work-directory settings (hookrun.kdl)
//! - Action definitions

pub mod action;
pub mod error;
mod nodes;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, HookrunConfig, LogsConfig, QueueConfig, WorkDirectoryConfig, load_config,
    parse_config,
};
