//! Notification rules: when, for which entity class, and to whom a reminder fires.
//!
//! ## Evaluation
//! ```text
//! rule + candidates (fresh per tick)
//!   → skip disabled rules / other rule types / settled entities
//!     → trigger window from deadline ± threshold
//!       → now inside window?
//!         → dedup on (rule, related, task_type) within the frequency window
//!           → insert NotificationTask
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use docket_core::error::{DocketError, Result};
use serde::{Deserialize, Serialize};

use crate::clock::{day_start, week_start};
use crate::nodes::ProcessNode;
use crate::notify::Recipient;
use crate::persistence::DocketDb;
use crate::store::CostRecord;
use crate::tasks::{NewTask, NotificationTask, RelatedRef};

macro_rules! string_enum {
    ($name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DocketError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(DocketError::validation(format!(
                        concat!("unknown ", $label, " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(RuleType, "rule_type" {
    NodeDeadline => "node_deadline",
    CostDue => "cost_due",
});

string_enum!(TriggerCondition, "trigger_condition" {
    BeforeDeadline => "before_deadline",
    OnDueDate => "on_due_date",
    AfterDeadline => "after_deadline",
});

string_enum!(ThresholdUnit, "threshold_unit" {
    Minutes => "minutes",
    Hours => "hours",
    Days => "days",
});

string_enum!(Frequency, "frequency" {
    Once => "once",
    Daily => "daily",
    Weekly => "weekly",
});

/// Longest threshold a rule may carry, about a century.
pub const MAX_THRESHOLD_DAYS: i64 = 36_500;

impl ThresholdUnit {
    pub fn duration(&self, value: i64) -> Result<Duration> {
        let duration = match self {
            ThresholdUnit::Minutes => Duration::try_minutes(value),
            ThresholdUnit::Hours => Duration::try_hours(value),
            ThresholdUnit::Days => Duration::try_days(value),
        };
        duration.ok_or_else(|| {
            DocketError::Computation(format!("threshold of {value} {self} is out of range"))
        })
    }
}

/// A configured reminder rule. Applies to every entity of its `rule_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: i64,
    pub name: String,
    pub rule_type: RuleType,
    pub trigger_condition: TriggerCondition,
    pub threshold_value: i64,
    pub threshold_unit: ThresholdUnit,
    pub frequency: Frequency,
    pub recipients: Vec<Recipient>,
    pub is_enabled: bool,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRule {
    pub fn threshold(&self) -> Result<Duration> {
        self.threshold_unit.duration(self.threshold_value)
    }

    /// Task type written on tasks this rule creates.
    pub fn task_type(&self) -> String {
        format!("{}:{}", self.rule_type, self.trigger_condition)
    }

    /// The interval in which an entity due at `due` should be reminded.
    /// `end` is exclusive; `None` means open-ended. A window that falls
    /// outside the representable time range is a computation error.
    pub fn trigger_window(
        &self,
        due: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<(DateTime<Utc>, Option<DateTime<Utc>>)> {
        let out_of_range =
            || DocketError::Computation(format!("trigger window of rule '{}' overflows", self.name));
        let one_ms = Duration::milliseconds(1);
        match self.trigger_condition {
            TriggerCondition::BeforeDeadline => {
                let start = due.checked_sub_signed(self.threshold()?).ok_or_else(out_of_range)?;
                let end = due.checked_add_signed(one_ms).ok_or_else(out_of_range)?;
                Ok((start, Some(end)))
            }
            TriggerCondition::OnDueDate => {
                let start = day_start(due, offset);
                let end = start.checked_add_signed(Duration::days(1)).ok_or_else(out_of_range)?;
                Ok((start, Some(end)))
            }
            // strictly after the deadline, even with a zero threshold
            TriggerCondition::AfterDeadline => {
                let start = due
                    .checked_add_signed(self.threshold()?.max(one_ms))
                    .ok_or_else(out_of_range)?;
                Ok((start, None))
            }
        }
    }

    /// Earliest creation time of an existing task that still suppresses a new one.
    /// `None` means any task ever created suppresses.
    pub fn dedup_since(&self, now: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        match self.frequency {
            Frequency::Once => None,
            Frequency::Daily => Some(day_start(now, offset)),
            Frequency::Weekly => Some(week_start(now, offset)),
        }
    }
}

/// Rule fields as received from the API. Everything optional so that missing
/// fields surface as validation errors rather than decode failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rule_type: Option<String>,
    #[serde(default)]
    pub trigger_condition: Option<String>,
    #[serde(default)]
    pub threshold_value: Option<i64>,
    #[serde(default)]
    pub threshold_unit: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub recipients: Option<Vec<Recipient>>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A validated rule ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDraft {
    pub name: String,
    pub rule_type: RuleType,
    pub trigger_condition: TriggerCondition,
    pub threshold_value: i64,
    pub threshold_unit: ThresholdUnit,
    pub frequency: Frequency,
    pub recipients: Vec<Recipient>,
    pub is_enabled: bool,
    pub description: String,
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DocketError::validation(format!("{name} is required")))
}

impl RuleInput {
    pub fn validate(&self) -> Result<RuleDraft> {
        let rule_type: RuleType = required(&self.rule_type, "rule_type")?.parse()?;
        let trigger_condition: TriggerCondition =
            required(&self.trigger_condition, "trigger_condition")?.parse()?;
        let threshold_value = self
            .threshold_value
            .ok_or_else(|| DocketError::validation("threshold_value is required"))?;
        if threshold_value < 0 {
            return Err(DocketError::validation("threshold_value must be >= 0"));
        }
        let threshold_unit: ThresholdUnit =
            required(&self.threshold_unit, "threshold_unit")?.parse()?;
        let within_bound = threshold_unit
            .duration(threshold_value)
            .is_ok_and(|d| d <= Duration::days(MAX_THRESHOLD_DAYS));
        if !within_bound {
            return Err(DocketError::validation(format!(
                "threshold must not exceed {MAX_THRESHOLD_DAYS} days"
            )));
        }
        let frequency: Frequency = required(&self.frequency, "frequency")?.parse()?;
        let recipients = self.recipients.clone().unwrap_or_default();
        let is_enabled = self.is_enabled.unwrap_or(true);
        if is_enabled && recipients.is_empty() {
            return Err(DocketError::validation("an enabled rule needs at least one recipient"));
        }
        let name = self
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{rule_type} {trigger_condition}"));

        Ok(RuleDraft {
            name,
            rule_type,
            trigger_condition,
            threshold_value,
            threshold_unit,
            frequency,
            recipients,
            is_enabled,
            description: self.description.clone().unwrap_or_default(),
        })
    }

    /// Overlay this input on an existing rule (for PUT) and validate the result.
    pub fn merged_onto(&self, rule: &NotificationRule) -> Result<RuleDraft> {
        RuleInput {
            name: self.name.clone().or_else(|| Some(rule.name.clone())),
            rule_type: self.rule_type.clone().or_else(|| Some(rule.rule_type.to_string())),
            trigger_condition: self
                .trigger_condition
                .clone()
                .or_else(|| Some(rule.trigger_condition.to_string())),
            threshold_value: self.threshold_value.or(Some(rule.threshold_value)),
            threshold_unit: self
                .threshold_unit
                .clone()
                .or_else(|| Some(rule.threshold_unit.to_string())),
            frequency: self.frequency.clone().or_else(|| Some(rule.frequency.to_string())),
            recipients: self.recipients.clone().or_else(|| Some(rule.recipients.clone())),
            is_enabled: self.is_enabled.or(Some(rule.is_enabled)),
            description: self.description.clone().or_else(|| Some(rule.description.clone())),
        }
        .validate()
    }
}

/// An entity a rule can fire for.
#[derive(Debug, Clone)]
pub enum Candidate {
    Node(ProcessNode),
    Cost(CostRecord),
}

impl Candidate {
    pub fn rule_type(&self) -> RuleType {
        match self {
            Candidate::Node(_) => RuleType::NodeDeadline,
            Candidate::Cost(_) => RuleType::CostDue,
        }
    }

    pub fn related(&self) -> RelatedRef {
        match self {
            Candidate::Node(n) => RelatedRef::Node(n.id),
            Candidate::Cost(c) => RelatedRef::Cost(c.id),
        }
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Candidate::Node(n) => n.deadline,
            Candidate::Cost(c) => c.due_date,
        }
    }

    /// Completed nodes and paid costs never need reminders.
    pub fn is_settled(&self) -> bool {
        match self {
            Candidate::Node(n) => n.is_completed() || n.completion_time.is_some(),
            Candidate::Cost(c) => c.paid,
        }
    }

    fn label(&self) -> String {
        match self {
            Candidate::Node(n) => format!("node \"{}\" of case #{}", n.node_name, n.case_id),
            Candidate::Cost(c) => {
                format!("{} of {:.2} for case #{}", c.cost_type, c.amount, c.case_id)
            }
        }
    }
}

/// Human-readable reminder text.
pub fn render_content(
    rule: &NotificationRule,
    candidate: &Candidate,
    due: DateTime<Utc>,
    now: DateTime<Utc>,
) -> String {
    let label = candidate.label();
    let due_str = due.format("%Y-%m-%d %H:%M UTC");
    match rule.trigger_condition {
        TriggerCondition::BeforeDeadline => {
            let hours = (due - now).num_hours().max(0);
            let remaining = if hours >= 24 {
                format!("{} day(s)", (hours + 23) / 24)
            } else {
                format!("{hours} hour(s)")
            };
            format!("Reminder: {label} is due on {due_str} ({remaining} left).")
        }
        TriggerCondition::OnDueDate => format!("Due today: {label} is due on {due_str}."),
        TriggerCondition::AfterDeadline => {
            let days = ((now - due).num_hours().max(0) + 23) / 24;
            format!("Overdue: {label} was due on {due_str} ({days} day(s) overdue).")
        }
    }
}

/// Result of evaluating one rule.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Evaluation {
    pub created: Vec<NotificationTask>,
    /// Due, but a task already exists in the frequency window.
    pub suppressed: usize,
    /// Skipped because of a per-entity error.
    pub failed: usize,
}

/// Evaluates rules against candidate entities and writes due tasks.
#[derive(Clone)]
pub struct RuleEngine {
    db: Arc<DocketDb>,
    offset: FixedOffset,
}

impl RuleEngine {
    pub fn new(db: Arc<DocketDb>, offset: FixedOffset) -> Self {
        Self { db, offset }
    }

    /// Evaluate one rule. Disabled rules produce nothing; per-entity failures
    /// are logged and skipped.
    pub fn evaluate(
        &self,
        rule: &NotificationRule,
        candidates: &[Candidate],
        now: DateTime<Utc>,
    ) -> Evaluation {
        let mut eval = Evaluation::default();
        if !rule.is_enabled {
            return eval;
        }

        for candidate in candidates {
            if candidate.rule_type() != rule.rule_type || candidate.is_settled() {
                continue;
            }
            let Some(due) = candidate.due_at() else {
                continue;
            };
            let (start, end) = match rule.trigger_window(due, self.offset) {
                Ok(window) => window,
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Rule '{}' skipped for {}: {e}",
                        rule.name,
                        candidate.related()
                    );
                    eval.failed += 1;
                    continue;
                }
            };
            if now < start || end.is_some_and(|e| now >= e) {
                continue;
            }

            match self.create_unless_duplicate(rule, candidate, due, now) {
                Ok(Some(task)) => {
                    tracing::info!(
                        "🔔 Rule '{}' created task #{} for {}",
                        rule.name,
                        task.id,
                        task.related
                    );
                    eval.created.push(task);
                }
                Ok(None) => eval.suppressed += 1,
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Rule '{}' failed for {}: {e}",
                        rule.name,
                        candidate.related()
                    );
                    eval.failed += 1;
                }
            }
        }

        eval
    }

    fn create_unless_duplicate(
        &self,
        rule: &NotificationRule,
        candidate: &Candidate,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationTask>> {
        let related = candidate.related();
        let task_type = rule.task_type();
        let since = rule.dedup_since(now, self.offset);
        if self.db.task_exists_since(Some(rule.id), related, &task_type, since)? {
            tracing::debug!("Rule '{}' suppressed duplicate for {}", rule.name, related);
            return Ok(None);
        }

        let task = self.db.insert_task(
            &NewTask {
                rule_id: Some(rule.id),
                related,
                task_type,
                scheduled_time: now,
                content: render_content(rule, candidate, due, now),
                recipients: rule.recipients.clone(),
            },
            now,
        )?;
        Ok(Some(task))
    }
}
