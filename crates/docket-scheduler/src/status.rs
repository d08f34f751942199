//! Node status calculation.
//!
//! One ordered decision table drives both the in-process calculation and the
//! SQL `CASE` expression used by the bulk sweep, so the two cannot drift.
//!
//! ```text
//! completion_time set              → completed
//! no deadline, start_time set      → in_progress
//! no deadline                      → pending
//! now > deadline                   → overdue
//! start_time set                   → in_progress
//! otherwise                        → pending
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use docket_core::error::DocketError;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a process node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::InProgress => "in_progress",
            NodeStatus::Completed => "completed",
            NodeStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = DocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NodeStatus::Pending),
            "in_progress" => Ok(NodeStatus::InProgress),
            "completed" => Ok(NodeStatus::Completed),
            "overdue" => Ok(NodeStatus::Overdue),
            other => Err(DocketError::Computation(format!("unknown node status '{other}'"))),
        }
    }
}

/// The time fields a status decision depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusInputs {
    pub completion_time: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
enum Condition {
    Completed,
    UndatedStarted,
    Undated,
    PastDeadline,
    Started,
    Otherwise,
}

/// First matching row wins.
const DECISION_TABLE: &[(Condition, NodeStatus)] = &[
    (Condition::Completed, NodeStatus::Completed),
    (Condition::UndatedStarted, NodeStatus::InProgress),
    (Condition::Undated, NodeStatus::Pending),
    (Condition::PastDeadline, NodeStatus::Overdue),
    (Condition::Started, NodeStatus::InProgress),
    (Condition::Otherwise, NodeStatus::Pending),
];

impl Condition {
    fn holds(&self, inputs: &StatusInputs, now: DateTime<Utc>) -> bool {
        match self {
            Condition::Completed => inputs.completion_time.is_some(),
            Condition::UndatedStarted => inputs.deadline.is_none() && inputs.start_time.is_some(),
            Condition::Undated => inputs.deadline.is_none(),
            Condition::PastDeadline => inputs.deadline.is_some_and(|d| now > d),
            Condition::Started => inputs.start_time.is_some(),
            Condition::Otherwise => true,
        }
    }

    /// Time columns the predicate reads.
    fn columns(&self) -> &'static [&'static str] {
        match self {
            Condition::Completed => &["completion_time"],
            Condition::UndatedStarted => &["deadline", "start_time"],
            Condition::Undated | Condition::PastDeadline => &["deadline"],
            Condition::Started => &["start_time"],
            Condition::Otherwise => &[],
        }
    }

    /// Same predicate over `process_nodes` columns. Timestamps are stored
    /// fixed-width, so text comparison is chronological.
    fn sql(&self, now_param: &str) -> String {
        match self {
            Condition::Completed => "completion_time IS NOT NULL".into(),
            Condition::UndatedStarted => "deadline IS NULL AND start_time IS NOT NULL".into(),
            Condition::Undated => "deadline IS NULL".into(),
            Condition::PastDeadline => format!("deadline < {now_param}"),
            Condition::Started => "start_time IS NOT NULL".into(),
            Condition::Otherwise => "1".into(),
        }
    }
}

/// Compute the status of a node at `now`.
pub fn calculate_status(inputs: &StatusInputs, now: DateTime<Utc>) -> NodeStatus {
    DECISION_TABLE
        .iter()
        .find(|(condition, _)| condition.holds(inputs, now))
        .map(|(_, status)| *status)
        .unwrap_or(NodeStatus::Pending)
}

/// SQL `CASE` expression equivalent to [`calculate_status`].
/// `now_param` is the placeholder bound to the formatted current time.
pub fn status_case_sql(now_param: &str) -> String {
    let mut sql = String::from("CASE");
    for (condition, status) in DECISION_TABLE {
        match condition {
            Condition::Otherwise => sql.push_str(&format!(" ELSE '{status}'")),
            _ => sql.push_str(&format!(" WHEN {} THEN '{status}'", condition.sql(now_param))),
        }
    }
    sql.push_str(" END");
    sql
}

/// GLOB matching the stored timestamp form written by `clock::format_ts`.
pub const CANONICAL_TS_GLOB: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9].[0-9][0-9][0-9]Z";

/// SQL predicate that holds when every time column the decision table reads
/// is NULL or canonical. Rows failing it would fail to parse one by one, so
/// set-based statements must leave them alone.
pub fn well_formed_times_sql() -> String {
    let mut columns: Vec<&str> = Vec::new();
    for (condition, _) in DECISION_TABLE {
        for column in condition.columns() {
            if !columns.contains(column) {
                columns.push(column);
            }
        }
    }
    columns
        .iter()
        .map(|c| format!("({c} IS NULL OR {c} GLOB '{CANONICAL_TS_GLOB}')"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Overdue summary for a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueInfo {
    pub is_overdue: bool,
    pub overdue_days: i64,
}

const DAY_MS: i64 = 86_400_000;

/// Overdue days are whole days rounded up; completed or undated nodes are never overdue.
pub fn check_overdue(inputs: &StatusInputs, now: DateTime<Utc>) -> OverdueInfo {
    if inputs.completion_time.is_some() {
        return OverdueInfo { is_overdue: false, overdue_days: 0 };
    }
    match inputs.deadline {
        Some(deadline) if now > deadline => {
            let late_ms = (now - deadline).num_milliseconds();
            OverdueInfo {
                is_overdue: true,
                overdue_days: (late_ms + DAY_MS - 1) / DAY_MS,
            }
        }
        _ => OverdueInfo { is_overdue: false, overdue_days: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{format_ts, parse_ts};

    fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    fn inputs(
        completion: Option<&str>,
        deadline: Option<&str>,
        start: Option<&str>,
    ) -> StatusInputs {
        StatusInputs {
            completion_time: completion.map(ts),
            deadline: deadline.map(ts),
            start_time: start.map(ts),
        }
    }

    const NOW: &str = "2024-10-15T00:00:00Z";

    #[test]
    fn test_completion_overrides_everything() {
        let now = ts(NOW);
        for deadline in [None, Some("2024-10-01T00:00:00Z"), Some("2024-12-01T00:00:00Z")] {
            for start in [None, Some("2024-09-01T00:00:00Z")] {
                let i = inputs(Some("2024-10-02T00:00:00Z"), deadline, start);
                assert_eq!(calculate_status(&i, now), NodeStatus::Completed);
            }
        }
    }

    #[test]
    fn test_past_deadline_is_overdue() {
        let now = ts(NOW);
        assert_eq!(
            calculate_status(&inputs(None, Some("2024-10-10T00:00:00Z"), None), now),
            NodeStatus::Overdue
        );
        assert_eq!(
            calculate_status(
                &inputs(None, Some("2024-10-14T23:59:59Z"), Some("2024-10-01T00:00:00Z")),
                now
            ),
            NodeStatus::Overdue
        );
    }

    #[test]
    fn test_undated_nodes() {
        let now = ts(NOW);
        assert_eq!(calculate_status(&inputs(None, None, None), now), NodeStatus::Pending);
        assert_eq!(
            calculate_status(&inputs(None, None, Some("2024-10-01T00:00:00Z")), now),
            NodeStatus::InProgress
        );
    }

    #[test]
    fn test_deadline_boundary_is_not_overdue() {
        let now = ts(NOW);
        assert_eq!(calculate_status(&inputs(None, Some(NOW), None), now), NodeStatus::Pending);
        assert_eq!(
            calculate_status(&inputs(None, Some(NOW), Some("2024-10-01T00:00:00Z")), now),
            NodeStatus::InProgress
        );
    }

    #[test]
    fn test_overdue_days_scenario() {
        let info = check_overdue(&inputs(None, Some("2024-10-10T00:00:00Z"), None), ts(NOW));
        assert!(info.is_overdue);
        assert_eq!(info.overdue_days, 5);
    }

    #[test]
    fn test_overdue_days_round_up() {
        let info = check_overdue(
            &inputs(None, Some("2024-10-14T23:00:00Z"), None),
            ts(NOW),
        );
        assert_eq!(info.overdue_days, 1);
    }

    #[test]
    fn test_not_overdue_cases() {
        let now = ts(NOW);
        let zero = OverdueInfo { is_overdue: false, overdue_days: 0 };
        assert_eq!(check_overdue(&inputs(None, None, None), now), zero);
        assert_eq!(check_overdue(&inputs(None, Some("2024-11-01T00:00:00Z"), None), now), zero);
        assert_eq!(
            check_overdue(
                &inputs(Some("2024-10-12T00:00:00Z"), Some("2024-10-10T00:00:00Z"), None),
                now
            ),
            zero
        );
    }

    #[test]
    fn test_status_parse() {
        for status in [
            NodeStatus::Pending,
            NodeStatus::InProgress,
            NodeStatus::Completed,
            NodeStatus::Overdue,
        ] {
            assert_eq!(status.as_str().parse::<NodeStatus>().unwrap(), status);
        }
        assert!("done".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn test_well_formed_guard_covers_every_time_column() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE process_nodes (completion_time TEXT, deadline TEXT, start_time TEXT);",
        )
        .unwrap();
        let sql = format!("SELECT COUNT(*) FROM process_nodes WHERE {}", well_formed_times_sql());
        let good = format_ts(ts(NOW));

        let rows = [
            (Some(good.as_str()), Some(good.as_str()), Some(good.as_str()), 1),
            (None, None, None, 1),
            (Some("not a date"), None, None, 0),
            (None, Some("next tuesday"), None, 0),
            (None, None, Some("2024-10-01"), 0),
        ];
        for (completion, deadline, start, expected) in rows {
            conn.execute("DELETE FROM process_nodes", []).unwrap();
            conn.execute(
                "INSERT INTO process_nodes VALUES (?1, ?2, ?3)",
                rusqlite::params![completion, deadline, start],
            )
            .unwrap();
            let count: i64 = conn.query_row(&sql, [], |r| r.get(0)).unwrap();
            assert_eq!(count, expected, "completion={completion:?} deadline={deadline:?} start={start:?}");
        }
    }

    #[test]
    fn test_sql_case_agrees_with_calculator() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE process_nodes (completion_time TEXT, deadline TEXT, start_time TEXT);",
        )
        .unwrap();

        let times = [
            None,
            Some("2024-10-01T00:00:00Z"),
            Some(NOW),
            Some("2024-10-15T00:00:00.001Z"),
            Some("2024-12-01T00:00:00Z"),
        ];
        let now = ts(NOW);
        let sql = format!("SELECT {} FROM process_nodes", status_case_sql("?1"));

        for completion in [None, Some("2024-10-02T00:00:00Z")] {
            for deadline in times {
                for start in times {
                    conn.execute("DELETE FROM process_nodes", []).unwrap();
                    conn.execute(
                        "INSERT INTO process_nodes VALUES (?1, ?2, ?3)",
                        rusqlite::params![
                            completion.map(|s| format_ts(ts(s))),
                            deadline.map(|s| format_ts(ts(s))),
                            start.map(|s| format_ts(ts(s))),
                        ],
                    )
                    .unwrap();
                    let from_sql: String = conn
                        .query_row(&sql, [format_ts(now)], |r| r.get(0))
                        .unwrap();
                    let expected = calculate_status(&inputs(completion, deadline, start), now);
                    assert_eq!(
                        from_sql,
                        expected.as_str(),
                        "completion={completion:?} deadline={deadline:?} start={start:?}"
                    );
                }
            }
        }
    }
}
