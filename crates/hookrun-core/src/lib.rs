//! Core domain types and traits for hookrun.
//!
//! This crate contains:
//! - Job identifiers, job records and the job state machine
//! - Repository events and work-directory key derivation helpers
//! - Action configuration types
//! - The action executor trait and per-job execution logs

pub mod action;
pub mod error;
pub mod event;
pub mod executor;
pub mod id;
pub mod job;

pub use action::{ActionConfig, ActionKind};
pub use error::{Error, Result};
pub use event::Event;
pub use id::JobId;
pub use job::{Job, JobState};
