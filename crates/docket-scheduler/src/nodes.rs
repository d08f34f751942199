//! Process node data model: one procedural step of a case.

use chrono::{DateTime, Utc};
use docket_core::error::{DocketError, Result};
use serde::{Deserialize, Serialize};

use crate::status::{NodeStatus, OverdueInfo, StatusInputs, calculate_status, check_overdue};

/// A procedural step of a case, carrying an optional start time and deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessNode {
    pub id: i64,
    pub case_id: i64,
    pub node_type: String,
    pub node_name: String,
    pub handler: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub status: NodeStatus,
    /// 0–100; 100 implies completed.
    pub progress: u8,
    pub node_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessNode {
    pub fn status_inputs(&self) -> StatusInputs {
        StatusInputs {
            completion_time: self.completion_time,
            deadline: self.deadline,
            start_time: self.start_time,
        }
    }

    pub fn calculated_status(&self, now: DateTime<Utc>) -> NodeStatus {
        calculate_status(&self.status_inputs(), now)
    }

    pub fn overdue_info(&self, now: DateTime<Utc>) -> OverdueInfo {
        check_overdue(&self.status_inputs(), now)
    }

    pub fn is_completed(&self) -> bool {
        self.status == NodeStatus::Completed
    }
}

/// Input for adding a node to a case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNode {
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Appended after the last node when absent.
    #[serde(default)]
    pub node_order: Option<i32>,
}

impl NewNode {
    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(DocketError::validation("node_name is required"));
        }
        if self.node_type.trim().is_empty() {
            return Err(DocketError::validation("node_type is required"));
        }
        if let (Some(start), Some(deadline)) = (self.start_time, self.deadline)
            && deadline < start
        {
            return Err(DocketError::validation("deadline precedes start_time"));
        }
        Ok(())
    }
}

/// Partial update of a node. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUpdate {
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub node_order: Option<i32>,
    /// Clear the completion and take the node back into work.
    #[serde(default)]
    pub reopen: bool,
}

impl NodeUpdate {
    /// Apply onto `node`, keeping completion_time and progress consistent:
    /// a completion time forces progress 100, progress 100 stamps a completion time.
    pub fn apply(&self, node: &mut ProcessNode, now: DateTime<Utc>) -> Result<()> {
        if let Some(p) = self.progress
            && p > 100
        {
            return Err(DocketError::validation(format!("progress {p} is outside 0-100")));
        }

        if let Some(name) = &self.node_name {
            if name.trim().is_empty() {
                return Err(DocketError::validation("node_name cannot be empty"));
            }
            node.node_name = name.clone();
        }
        if let Some(node_type) = &self.node_type {
            node.node_type = node_type.clone();
        }
        if let Some(handler) = &self.handler {
            node.handler = Some(handler.clone());
        }
        if let Some(start) = self.start_time {
            node.start_time = Some(start);
        }
        if let Some(deadline) = self.deadline {
            node.deadline = Some(deadline);
        }
        if let Some(order) = self.node_order {
            node.node_order = order;
        }

        if self.reopen {
            if self.completion_time.is_some() || self.progress == Some(100) {
                return Err(DocketError::validation("cannot reopen and complete in one update"));
            }
            node.completion_time = None;
            node.progress = self.progress.unwrap_or(0);
            return Ok(());
        }

        if let Some(done_at) = self.completion_time {
            node.completion_time = Some(done_at);
            node.progress = 100;
        } else if let Some(p) = self.progress {
            if p == 100 {
                node.completion_time.get_or_insert(now);
                node.progress = 100;
            } else if node.completion_time.is_some() {
                return Err(DocketError::validation(
                    "node is completed; set reopen to lower its progress",
                ));
            } else {
                node.progress = p;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_ts;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    fn node() -> ProcessNode {
        let created = ts("2024-10-01T00:00:00Z");
        ProcessNode {
            id: 1,
            case_id: 7,
            node_type: "filing".into(),
            node_name: "Submit evidence".into(),
            handler: Some("li.wei".into()),
            start_time: Some(created),
            deadline: Some(ts("2024-10-10T00:00:00Z")),
            completion_time: None,
            status: NodeStatus::InProgress,
            progress: 40,
            node_order: 1,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_progress_100_stamps_completion() {
        let now = ts("2024-10-05T09:00:00Z");
        let mut n = node();
        NodeUpdate { progress: Some(100), ..Default::default() }.apply(&mut n, now).unwrap();
        assert_eq!(n.completion_time, Some(now));
        assert_eq!(n.calculated_status(now), NodeStatus::Completed);
    }

    #[test]
    fn test_completion_time_forces_full_progress() {
        let done = ts("2024-10-04T00:00:00Z");
        let mut n = node();
        NodeUpdate { completion_time: Some(done), ..Default::default() }
            .apply(&mut n, ts("2024-10-05T00:00:00Z"))
            .unwrap();
        assert_eq!(n.progress, 100);
        assert_eq!(n.completion_time, Some(done));
    }

    #[test]
    fn test_progress_out_of_range() {
        let mut n = node();
        let err = NodeUpdate { progress: Some(120), ..Default::default() }
            .apply(&mut n, ts("2024-10-05T00:00:00Z"))
            .unwrap_err();
        assert!(matches!(err, DocketError::Validation(_)));
    }

    #[test]
    fn test_lowering_progress_of_completed_node_requires_reopen() {
        let now = ts("2024-10-05T00:00:00Z");
        let mut n = node();
        n.completion_time = Some(now);
        n.progress = 100;

        let err = NodeUpdate { progress: Some(50), ..Default::default() }.apply(&mut n, now);
        assert!(err.is_err());

        NodeUpdate { progress: Some(50), reopen: true, ..Default::default() }
            .apply(&mut n, now)
            .unwrap();
        assert_eq!(n.completion_time, None);
        assert_eq!(n.progress, 50);
    }

    #[test]
    fn test_new_node_validation() {
        let mut new = NewNode {
            node_type: "hearing".into(),
            node_name: "First hearing".into(),
            ..Default::default()
        };
        assert!(new.validate().is_ok());

        new.start_time = Some(ts("2024-10-10T00:00:00Z"));
        new.deadline = Some(ts("2024-10-01T00:00:00Z"));
        assert!(new.validate().is_err());

        new.deadline = None;
        new.node_name = "  ".into();
        assert!(new.validate().is_err());
    }
}
