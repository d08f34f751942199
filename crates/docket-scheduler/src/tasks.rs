//! Notification task definitions: persisted reminders and their delivery history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use docket_core::error::DocketError;
use serde::{Deserialize, Serialize};

use crate::notify::Recipient;

/// Weak reference from a task to the entity it is about. Lookup only, never ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RelatedRef {
    Node(i64),
    Cost(i64),
    Task(i64),
}

impl RelatedRef {
    pub fn id(&self) -> i64 {
        match self {
            RelatedRef::Node(id) | RelatedRef::Cost(id) | RelatedRef::Task(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RelatedRef::Node(_) => "node",
            RelatedRef::Cost(_) => "cost",
            RelatedRef::Task(_) => "task",
        }
    }

    pub fn from_parts(kind: &str, id: i64) -> Result<Self, DocketError> {
        match kind {
            "node" => Ok(RelatedRef::Node(id)),
            "cost" => Ok(RelatedRef::Cost(id)),
            "task" => Ok(RelatedRef::Task(id)),
            other => Err(DocketError::Computation(format!("unknown related_type '{other}'"))),
        }
    }
}

impl fmt::Display for RelatedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Task status. `Read` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Sent,
    Read,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Sent => "sent",
            TaskStatus::Read => "read",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "sent" => Ok(TaskStatus::Sent),
            "read" => Ok(TaskStatus::Read),
            other => Err(DocketError::validation(format!("unknown task status '{other}'"))),
        }
    }
}

/// Task type used for reminders created by hand rather than by a rule.
pub const MANUAL_TASK_TYPE: &str = "manual";

/// A persisted reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTask {
    pub id: i64,
    /// Rule that produced this task, if any.
    pub rule_id: Option<i64>,
    pub related: RelatedRef,
    pub task_type: String,
    pub scheduled_time: DateTime<Utc>,
    pub content: String,
    pub recipients: Vec<Recipient>,
    pub status: TaskStatus,
    /// Delivery rounds attempted so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

/// A task about to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub rule_id: Option<i64>,
    pub related: RelatedRef,
    pub task_type: String,
    pub scheduled_time: DateTime<Utc>,
    pub content: String,
    pub recipients: Vec<Recipient>,
}

/// Outcome of one delivery attempt on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Success,
    Failure,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Success => "success",
            SendStatus::Failure => "failure",
        }
    }
}

impl FromStr for SendStatus {
    type Err = DocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(SendStatus::Success),
            "failure" => Ok(SendStatus::Failure),
            other => Err(DocketError::Computation(format!("unknown send status '{other}'"))),
        }
    }
}

/// One row per delivery attempt per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendHistory {
    pub id: i64,
    pub notification_id: i64,
    pub send_method: String,
    pub send_status: SendStatus,
    pub send_time: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Listing filter for tasks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub related_type: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}
