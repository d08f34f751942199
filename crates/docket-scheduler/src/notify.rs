//! Notification recipients and the rendered message handed to channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tasks::{NotificationTask, RelatedRef};

/// Who a reminder is for. Stored as JSON only at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    /// A user of the system, reached in-app.
    User { id: String },
    /// Everyone holding a role, reached in-app.
    Role { name: String },
    /// Whoever handles the related node.
    Handler,
    Email { address: String },
    Webhook { url: String },
    Telegram { chat_id: String },
}

impl Recipient {
    pub fn describe(&self) -> String {
        match self {
            Recipient::User { id } => format!("user:{id}"),
            Recipient::Role { name } => format!("role:{name}"),
            Recipient::Handler => "handler".into(),
            Recipient::Email { address } => format!("email:{address}"),
            Recipient::Webhook { url } => format!("webhook:{url}"),
            Recipient::Telegram { chat_id } => format!("telegram:{chat_id}"),
        }
    }
}

/// Encode recipients for the `recipients` column.
pub fn recipients_to_json(recipients: &[Recipient]) -> String {
    serde_json::to_string(recipients).unwrap_or_else(|_| "[]".into())
}

pub fn recipients_from_json(raw: &str) -> Result<Vec<Recipient>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
}

/// A notification rendered for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundNotification {
    pub task_id: i64,
    pub title: String,
    pub body: String,
    pub related: RelatedRef,
    pub scheduled_time: DateTime<Utc>,
}

impl OutboundNotification {
    pub fn from_task(task: &NotificationTask, title: &str) -> Self {
        Self {
            task_id: task.id,
            title: title.to_string(),
            body: task.content.clone(),
            related: task.related,
            scheduled_time: task.scheduled_time,
        }
    }
}
