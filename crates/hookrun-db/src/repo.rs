//! Repository traits and implementations.

pub mod jobs;

pub use jobs::{JobRecord, JobRepo, SqliteJobRepo};
