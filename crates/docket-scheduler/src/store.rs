//! Narrow interfaces to collaborators outside the lifecycle/notification core.
//!
//! [`crate::persistence::DocketDb`] implements all of them against its own
//! tables; other deployments can plug in their own case or cost systems.

use chrono::{DateTime, Utc};
use docket_core::error::Result;
use serde::{Deserialize, Serialize};

use crate::tasks::RelatedRef;

/// Case-log action recorded when a case status changes.
pub const CASE_STATUS_CHANGE: &str = "CASE_STATUS_CHANGE";

/// The slice of a legal case the core needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: i64,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCaseLog {
    pub case_id: i64,
    pub action: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseLogEntry {
    pub id: i64,
    pub case_id: i64,
    pub action: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A fee or cost item that may carry a due date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: i64,
    pub case_id: i64,
    pub cost_type: String,
    pub amount: f64,
    pub due_date: Option<DateTime<Utc>>,
    pub paid: bool,
}

/// What a task's related entity looks like when rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub title: String,
    pub case_id: Option<i64>,
    pub handler: Option<String>,
    pub due: Option<DateTime<Utc>>,
}

pub trait CaseStore: Send + Sync {
    fn find_case(&self, id: i64) -> Result<Option<Case>>;
    fn update_case_status(&self, id: i64, status: &str, at: DateTime<Utc>) -> Result<()>;
}

pub trait CaseLogStore: Send + Sync {
    fn append_case_log(&self, entry: &NewCaseLog) -> Result<i64>;
}

/// Candidate source for cost-due rules.
pub trait CostStore: Send + Sync {
    fn unpaid_costs(&self) -> Result<Vec<CostRecord>>;
}

/// Resolves a task's weak reference. `Ok(None)` means the entity is gone.
pub trait EntityLookup: Send + Sync {
    fn describe(&self, related: RelatedRef) -> Result<Option<EntitySummary>>;
}
