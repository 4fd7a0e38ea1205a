pub mod api;
pub mod config;
pub mod deck;
pub mod error;
pub mod poller;
pub mod render;
pub mod shell;
pub mod store;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One row of the job log: the latest known state of a generation task.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub task_id: String,
    #[serde(rename = "plain_text")]
    pub description: String,
    pub status: String,
    #[serde(rename = "url", default)]
    pub result_url: String,
}

impl JobRecord {
    pub fn pending(task_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            status: TaskState::Pending.to_string(),
            result_url: String::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from(self.status.as_str())
    }

    pub fn has_url(&self) -> bool {
        !self.result_url.is_empty()
    }
}

/// Status values reported by the service. Anything other than the two
/// terminal values keeps the poll loop going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Success,
    Failure,
    Other(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

impl From<&str> for TaskState {
    fn from(value: &str) -> Self {
        match value {
            "PENDING" => TaskState::Pending,
            "SUCCESS" => TaskState::Success,
            "FAILURE" => TaskState::Failure,
            other => TaskState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => f.write_str("PENDING"),
            TaskState::Success => f.write_str("SUCCESS"),
            TaskState::Failure => f.write_str("FAILURE"),
            TaskState::Other(s) => f.write_str(s),
        }
    }
}
