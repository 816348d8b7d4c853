//! Repository and issue-tracker events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event received from the source system, stored verbatim with its job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Delivery identifier from the source system.
    #[serde(default = "generate_event_id")]
    pub id: String,
    /// Event type, e.g. `issues` or `pull_request`.
    #[serde(default)]
    pub kind: String,
    /// Raw payload.
    #[serde(default)]
    pub payload: Value,
}

fn generate_event_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

impl Event {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
        }
    }

    /// Create an event with a freshly generated id.
    pub fn from_payload(kind: impl Into<String>, payload: Value) -> Self {
        Self::new(generate_event_id(), kind, payload)
    }

    /// Number of the pull request this event refers to.
    ///
    /// Comments on pull requests arrive as issue events whose `issue` carries a
    /// `pull_request` marker; those count as pull-request events.
    pub fn pull_request_number(&self) -> Option<u64> {
        if let Some(number) = number_at(&self.payload, "pull_request") {
            return Some(number);
        }
        let issue = self.payload.get("issue")?;
        if issue.get("pull_request").is_some_and(|v| !v.is_null()) {
            return issue.get("number").and_then(Value::as_u64);
        }
        None
    }

    /// Number of the issue this event refers to.
    pub fn issue_number(&self) -> Option<u64> {
        number_at(&self.payload, "issue")
    }
}

fn number_at(payload: &Value, key: &str) -> Option<u64> {
    payload.get(key)?.get("number")?.as_u64()
}
