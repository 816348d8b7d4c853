//! Action definitions.
//!
//! Actions are declared in configuration and referenced by name from queued
//! jobs. Which action runs for which event is decided upstream.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// A named automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub name: String,
    pub spec: ActionSpec,
    /// Extra environment variables for the executor.
    pub env: HashMap<String, String>,
}

impl ActionConfig {
    pub fn kind(&self) -> ActionKind {
        self.spec.kind()
    }
}

/// What an action does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionSpec {
    /// A shell command line run with `sh -c`.
    Shell { command: String },
    /// A script file run through an interpreter.
    Script {
        path: PathBuf,
        interpreter: Option<String>,
    },
    /// An LLM-driven agent. Executed by an external runtime.
    Agent { prompt: String },
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionSpec::Shell { .. } => ActionKind::Shell,
            ActionSpec::Script { .. } => ActionKind::Script,
            ActionSpec::Agent { .. } => ActionKind::Agent,
        }
    }
}

/// Executor family an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Shell,
    Script,
    Agent,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Shell => "shell",
            ActionKind::Script => "script",
            ActionKind::Agent => "agent",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
