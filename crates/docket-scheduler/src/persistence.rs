//! SQLite-backed persistence for cases, process nodes, costs, notification rules,
//! notification tasks and their send history.
//!
//! All timestamps are written by the caller in the fixed-width
//! `YYYY-MM-DDTHH:MM:SS.mmmZ` form, so text comparisons in SQL are chronological.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use docket_core::error::{DocketError, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::clock::{format_ts, parse_opt_ts, parse_ts};
use crate::nodes::{NewNode, ProcessNode};
use crate::notify::{recipients_from_json, recipients_to_json};
use crate::rules::{NotificationRule, RuleDraft};
use crate::status::{NodeStatus, status_case_sql, well_formed_times_sql};
use crate::store::{
    Case, CaseLogEntry, CaseLogStore, CaseStore, CostRecord, CostStore, EntityLookup,
    EntitySummary, NewCaseLog,
};
use crate::tasks::{
    NewTask, NotificationTask, RelatedRef, SendHistory, SendStatus, TaskFilter, TaskStatus,
};

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> DocketError + '_ {
    move |e| DocketError::Database(format!("{context}: {e}"))
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(format_ts)
}

const NODE_COLUMNS: &str = "id, case_id, node_type, node_name, handler, start_time, deadline, \
     completion_time, status, progress, node_order, created_at, updated_at";

const TASK_COLUMNS: &str = "id, rule_id, related_type, related_id, task_type, scheduled_time, \
     content, recipients, status, attempts, created_at, sent_at, read_at";

const RULE_COLUMNS: &str = "id, name, rule_type, trigger_condition, threshold_value, \
     threshold_unit, frequency, recipients, is_enabled, description, created_at, updated_at";

/// SQLite-backed store for all lifecycle and notification data.
pub struct DocketDb {
    conn: Mutex<Connection>,
}

impl DocketDb {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(db_err("WAL"))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DocketError::Database(format!("Lock: {e}")))
    }

    #[cfg(test)]
    pub(crate) fn lock_for_tests(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS cases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS case_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                case_id INTEGER NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
                action TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT '{}',  -- JSON
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS process_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                case_id INTEGER NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
                node_type TEXT NOT NULL,
                node_name TEXT NOT NULL,
                handler TEXT,
                start_time TEXT,
                deadline TEXT,
                completion_time TEXT,
                status TEXT NOT NULL DEFAULT 'pending',  -- pending, in_progress, completed, overdue
                progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
                node_order INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_nodes_case ON process_nodes(case_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_status ON process_nodes(status);

            CREATE TABLE IF NOT EXISTS costs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                case_id INTEGER NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
                cost_type TEXT NOT NULL,
                amount REAL NOT NULL DEFAULT 0,
                due_date TEXT,
                paid INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notification_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                rule_type TEXT NOT NULL,           -- node_deadline, cost_due
                trigger_condition TEXT NOT NULL,   -- before_deadline, on_due_date, after_deadline
                threshold_value INTEGER NOT NULL CHECK (threshold_value >= 0),
                threshold_unit TEXT NOT NULL,      -- minutes, hours, days
                frequency TEXT NOT NULL,           -- once, daily, weekly
                recipients TEXT NOT NULL DEFAULT '[]',  -- JSON
                is_enabled INTEGER NOT NULL DEFAULT 1,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- related_id is a weak reference: no foreign key, resolved on dispatch
            CREATE TABLE IF NOT EXISTS notification_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER,
                related_type TEXT NOT NULL,        -- node, cost, task
                related_id INTEGER NOT NULL,
                task_type TEXT NOT NULL,
                scheduled_time TEXT NOT NULL,
                content TEXT NOT NULL,
                recipients TEXT NOT NULL DEFAULT '[]',  -- JSON
                status TEXT NOT NULL DEFAULT 'pending',  -- pending, sent, read
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                sent_at TEXT,
                read_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON notification_tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_related
                ON notification_tasks(related_type, related_id, task_type);

            CREATE TABLE IF NOT EXISTS send_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                notification_id INTEGER NOT NULL
                    REFERENCES notification_tasks(id) ON DELETE CASCADE,
                send_method TEXT NOT NULL,
                send_status TEXT NOT NULL,         -- success, failure
                send_time TEXT NOT NULL,
                detail TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_history_task ON send_history(notification_id);
            ",
        )
        .map_err(db_err("Migration"))?;
        Ok(())
    }

    // ─── Cases ────────────────────────────────────────────────

    pub fn insert_case(&self, title: &str, status: &str, now: DateTime<Utc>) -> Result<Case> {
        let conn = self.lock()?;
        let now = format_ts(now);
        conn.execute(
            "INSERT INTO cases (title, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![title, status, now],
        )
        .map_err(db_err("Insert case"))?;
        Ok(Case {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            status: status.to_string(),
        })
    }

    pub fn get_case(&self, id: i64) -> Result<Option<Case>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, title, status FROM cases WHERE id = ?1",
            params![id],
            |r| Ok(Case { id: r.get(0)?, title: r.get(1)?, status: r.get(2)? }),
        )
        .optional()
        .map_err(db_err("Get case"))
    }

    pub fn list_case_logs(&self, case_id: i64) -> Result<Vec<CaseLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, case_id, action, detail, created_at FROM case_logs
                 WHERE case_id = ?1 ORDER BY id",
            )
            .map_err(db_err("Prepare"))?;
        let raw: Vec<(i64, i64, String, String, String)> = stmt
            .query_map(params![case_id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })
            .map_err(db_err("Query case logs"))?
            .filter_map(|r| r.ok())
            .collect();

        raw.into_iter()
            .map(|(id, case_id, action, detail, created_at)| {
                Ok(CaseLogEntry {
                    id,
                    case_id,
                    action,
                    detail: serde_json::from_str(&detail)?,
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }

    // ─── Process Nodes ────────────────────────────────────────

    /// Insert a node with its initial `status`. Order defaults to after the last node.
    pub fn insert_node(
        &self,
        case_id: i64,
        node: &NewNode,
        status: NodeStatus,
        now: DateTime<Utc>,
    ) -> Result<ProcessNode> {
        let id = {
            let conn = self.lock()?;
            let order: i32 = match node.node_order {
                Some(order) => order,
                None => conn
                    .query_row(
                        "SELECT COALESCE(MAX(node_order), 0) + 1 FROM process_nodes WHERE case_id = ?1",
                        params![case_id],
                        |r| r.get(0),
                    )
                    .map_err(db_err("Next node order"))?,
            };
            let now = format_ts(now);
            conn.execute(
                "INSERT INTO process_nodes
                 (case_id, node_type, node_name, handler, start_time, deadline, status,
                  progress, node_order, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?9)",
                params![
                    case_id,
                    node.node_type,
                    node.node_name,
                    node.handler,
                    opt_ts(node.start_time),
                    opt_ts(node.deadline),
                    status.as_str(),
                    order,
                    now,
                ],
            )
            .map_err(db_err("Insert node"))?;
            conn.last_insert_rowid()
        };
        self.get_node(id)?.ok_or(DocketError::not_found("node", id))
    }

    /// Fetch one node. A row that cannot be interpreted is a computation error.
    pub fn get_node(&self, id: i64) -> Result<Option<ProcessNode>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM process_nodes WHERE id = ?1"),
                params![id],
                NodeRow::read,
            )
            .optional()
            .map_err(db_err("Get node"))?;
        raw.map(NodeRow::into_node).transpose()
    }

    pub fn list_case_nodes(&self, case_id: i64) -> Result<Vec<ProcessNode>> {
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM process_nodes WHERE case_id = ?1 ORDER BY node_order, id"
            ),
            &[&case_id],
        )
    }

    pub fn nodes_with_status(&self, status: NodeStatus) -> Result<Vec<ProcessNode>> {
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM process_nodes WHERE status = ?1 ORDER BY case_id, node_order, id"
            ),
            &[&status.as_str()],
        )
    }

    /// Non-completed nodes whose deadline lies in `[from, to]`, soonest first.
    pub fn nodes_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProcessNode>> {
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM process_nodes
                 WHERE deadline IS NOT NULL AND deadline >= ?1 AND deadline <= ?2
                   AND completion_time IS NULL AND status <> 'completed'
                 ORDER BY deadline, id"
            ),
            &[&format_ts(from), &format_ts(to)],
        )
    }

    /// Unfinished nodes that carry a deadline: candidates for deadline rules.
    pub fn open_nodes_with_deadline(&self) -> Result<Vec<ProcessNode>> {
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM process_nodes
                 WHERE deadline IS NOT NULL AND completion_time IS NULL
                 ORDER BY deadline, id"
            ),
            &[],
        )
    }

    /// Run a node query; rows that cannot be interpreted are logged and skipped.
    fn query_nodes(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<ProcessNode>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err("Prepare"))?;
        let rows: Vec<NodeRow> = stmt
            .query_map(args, NodeRow::read)
            .map_err(db_err("Query nodes"))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                row.into_node()
                    .map_err(|e| tracing::warn!("⚠️ Skipping node {id}: {e}"))
                    .ok()
            })
            .collect())
    }

    /// Persist every editable field of `node`.
    pub fn save_node(&self, node: &ProcessNode, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE process_nodes SET node_type = ?2, node_name = ?3, handler = ?4,
                    start_time = ?5, deadline = ?6, completion_time = ?7, status = ?8,
                    progress = ?9, node_order = ?10, updated_at = ?11
                 WHERE id = ?1",
                params![
                    node.id,
                    node.node_type,
                    node.node_name,
                    node.handler,
                    opt_ts(node.start_time),
                    opt_ts(node.deadline),
                    opt_ts(node.completion_time),
                    node.status.as_str(),
                    node.progress,
                    node.node_order,
                    format_ts(now),
                ],
            )
            .map_err(db_err("Save node"))?;
        if changed == 0 {
            return Err(DocketError::not_found("node", node.id));
        }
        Ok(())
    }

    /// Compare-and-write: only succeeds if the stored status is still `expected`.
    pub fn update_node_status_if(
        &self,
        id: i64,
        expected: NodeStatus,
        status: NodeStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE process_nodes SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
                params![id, expected.as_str(), status.as_str(), format_ts(now)],
            )
            .map_err(db_err("Update node status"))?;
        Ok(changed > 0)
    }

    pub fn delete_node(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM process_nodes WHERE id = ?1", params![id])
            .map_err(db_err("Delete node"))?;
        Ok(changed > 0)
    }

    /// Set-based recomputation of every node's status. Only rows whose status
    /// actually changes are written, and only rows whose time columns all parse.
    /// Returns the number of rows changed.
    pub fn bulk_update_statuses(&self, now: DateTime<Utc>) -> Result<usize> {
        let case = status_case_sql("?1");
        let well_formed = well_formed_times_sql();
        let sql = format!(
            "UPDATE process_nodes SET status = {case}, updated_at = ?1
             WHERE status <> ({case}) AND {well_formed}"
        );
        let conn = self.lock()?;
        conn.execute(&sql, params![format_ts(now)])
            .map_err(db_err("Bulk status update"))
    }

    /// `(total, completed)` node counts of one case. A row only counts as
    /// completed when its time columns parse, so malformed rows stay unfinished.
    pub fn case_completion(&self, case_id: i64) -> Result<(i64, i64)> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'completed' AND {} THEN 1 ELSE 0 END), 0)
                 FROM process_nodes WHERE case_id = ?1",
                well_formed_times_sql()
            ),
            params![case_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(db_err("Case completion"))
    }

    /// Cases that have at least one node and whose nodes are all completed.
    pub fn fully_completed_case_ids(&self) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT case_id FROM process_nodes
                 GROUP BY case_id
                 HAVING SUM(CASE WHEN status = 'completed' AND {} THEN 0 ELSE 1 END) = 0
                 ORDER BY case_id",
                well_formed_times_sql()
            ))
            .map_err(db_err("Prepare"))?;
        let ids = stmt
            .query_map([], |r| r.get(0))
            .map_err(db_err("Query completed cases"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    // ─── Costs ────────────────────────────────────────────────

    pub fn insert_cost(
        &self,
        case_id: i64,
        cost_type: &str,
        amount: f64,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<CostRecord> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO costs (case_id, cost_type, amount, due_date, paid, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![case_id, cost_type, amount, opt_ts(due_date), format_ts(now)],
        )
        .map_err(db_err("Insert cost"))?;
        Ok(CostRecord {
            id: conn.last_insert_rowid(),
            case_id,
            cost_type: cost_type.to_string(),
            amount,
            due_date,
            paid: false,
        })
    }

    pub fn get_cost(&self, id: i64) -> Result<Option<CostRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, case_id, cost_type, amount, due_date, paid FROM costs WHERE id = ?1",
                params![id],
                CostRow::read,
            )
            .optional()
            .map_err(db_err("Get cost"))?;
        raw.map(CostRow::into_cost).transpose()
    }

    pub fn mark_cost_paid(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute("UPDATE costs SET paid = 1 WHERE id = ?1", params![id])
            .map_err(db_err("Mark cost paid"))?;
        Ok(changed > 0)
    }

    // ─── Notification Rules ───────────────────────────────────

    pub fn insert_rule(&self, draft: &RuleDraft, now: DateTime<Utc>) -> Result<NotificationRule> {
        let id = {
            let conn = self.lock()?;
            let now = format_ts(now);
            conn.execute(
                "INSERT INTO notification_rules
                 (name, rule_type, trigger_condition, threshold_value, threshold_unit, frequency,
                  recipients, is_enabled, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    draft.name,
                    draft.rule_type.as_str(),
                    draft.trigger_condition.as_str(),
                    draft.threshold_value,
                    draft.threshold_unit.as_str(),
                    draft.frequency.as_str(),
                    recipients_to_json(&draft.recipients),
                    draft.is_enabled,
                    draft.description,
                    now,
                ],
            )
            .map_err(db_err("Insert rule"))?;
            conn.last_insert_rowid()
        };
        self.get_rule(id)?.ok_or(DocketError::not_found("rule", id))
    }

    pub fn update_rule(
        &self,
        id: i64,
        draft: &RuleDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationRule>> {
        let changed = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE notification_rules SET name = ?2, rule_type = ?3, trigger_condition = ?4,
                    threshold_value = ?5, threshold_unit = ?6, frequency = ?7, recipients = ?8,
                    is_enabled = ?9, description = ?10, updated_at = ?11
                 WHERE id = ?1",
                params![
                    id,
                    draft.name,
                    draft.rule_type.as_str(),
                    draft.trigger_condition.as_str(),
                    draft.threshold_value,
                    draft.threshold_unit.as_str(),
                    draft.frequency.as_str(),
                    recipients_to_json(&draft.recipients),
                    draft.is_enabled,
                    draft.description,
                    format_ts(now),
                ],
            )
            .map_err(db_err("Update rule"))?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get_rule(id)
    }

    pub fn get_rule(&self, id: i64) -> Result<Option<NotificationRule>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {RULE_COLUMNS} FROM notification_rules WHERE id = ?1"),
                params![id],
                RuleRow::read,
            )
            .optional()
            .map_err(db_err("Get rule"))?;
        raw.map(RuleRow::into_rule).transpose()
    }

    pub fn list_rules(&self) -> Result<Vec<NotificationRule>> {
        self.query_rules(&format!("SELECT {RULE_COLUMNS} FROM notification_rules ORDER BY id"))
    }

    pub fn enabled_rules(&self) -> Result<Vec<NotificationRule>> {
        self.query_rules(&format!(
            "SELECT {RULE_COLUMNS} FROM notification_rules WHERE is_enabled = 1 ORDER BY id"
        ))
    }

    fn query_rules(&self, sql: &str) -> Result<Vec<NotificationRule>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err("Prepare"))?;
        let rows: Vec<RuleRow> = stmt
            .query_map([], RuleRow::read)
            .map_err(db_err("Query rules"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                row.into_rule()
                    .map_err(|e| tracing::warn!("⚠️ Skipping rule {id}: {e}"))
                    .ok()
            })
            .collect())
    }

    pub fn set_rule_enabled(&self, id: i64, enabled: bool, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE notification_rules SET is_enabled = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, enabled, format_ts(now)],
            )
            .map_err(db_err("Toggle rule"))?;
        Ok(changed > 0)
    }

    pub fn delete_rule(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM notification_rules WHERE id = ?1", params![id])
            .map_err(db_err("Delete rule"))?;
        Ok(changed > 0)
    }

    // ─── Notification Tasks ───────────────────────────────────

    pub fn insert_task(&self, task: &NewTask, now: DateTime<Utc>) -> Result<NotificationTask> {
        let id = {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO notification_tasks
                 (rule_id, related_type, related_id, task_type, scheduled_time, content,
                  recipients, status, attempts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0, ?8)",
                params![
                    task.rule_id,
                    task.related.kind(),
                    task.related.id(),
                    task.task_type,
                    format_ts(task.scheduled_time),
                    task.content,
                    recipients_to_json(&task.recipients),
                    format_ts(now),
                ],
            )
            .map_err(db_err("Insert task"))?;
            conn.last_insert_rowid()
        };
        self.get_task(id)?.ok_or(DocketError::not_found("task", id))
    }

    pub fn get_task(&self, id: i64) -> Result<Option<NotificationTask>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM notification_tasks WHERE id = ?1"),
                params![id],
                TaskRow::read,
            )
            .optional()
            .map_err(db_err("Get task"))?;
        raw.map(TaskRow::into_task).transpose()
    }

    /// List tasks, newest first. Filter values are validated before querying.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<NotificationTask>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM notification_tasks WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();
        if let Some(status) = filter.status.as_deref() {
            let status: TaskStatus = status.parse()?;
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(kind) = filter.related_type.as_deref() {
            let related = RelatedRef::from_parts(kind, 0)
                .map_err(|_| DocketError::validation(format!("unknown related_type '{kind}'")))?;
            args.push(related.kind().to_string());
            sql.push_str(&format!(" AND related_type = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY scheduled_time DESC, id DESC");
        sql.push_str(&format!(" LIMIT {}", filter.limit.unwrap_or(100).min(1000)));
        self.query_tasks(&sql, rusqlite::params_from_iter(args.iter()))
    }

    fn query_tasks<P: rusqlite::Params>(
        &self,
        sql: &str,
        args: P,
    ) -> Result<Vec<NotificationTask>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err("Prepare"))?;
        let rows: Vec<TaskRow> = stmt
            .query_map(args, TaskRow::read)
            .map_err(db_err("Query tasks"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                row.into_task()
                    .map_err(|e| tracing::warn!("⚠️ Skipping task {id}: {e}"))
                    .ok()
            })
            .collect())
    }

    /// Tasks not yet read.
    pub fn unread_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM notification_tasks WHERE status IN ('pending', 'sent')",
            [],
            |r| r.get(0),
        )
        .map_err(db_err("Unread count"))
    }

    /// Whether a task with this dedup key exists, optionally created no earlier than `since`.
    pub fn task_exists_since(
        &self,
        rule_id: Option<i64>,
        related: RelatedRef,
        task_type: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM notification_tasks
                WHERE related_type = ?1 AND related_id = ?2 AND task_type = ?3
                  AND rule_id IS ?4 AND (?5 IS NULL OR created_at >= ?5))",
            params![related.kind(), related.id(), task_type, rule_id, opt_ts(since)],
            |r| r.get(0),
        )
        .map_err(db_err("Dedup check"))
    }

    /// Pending tasks that are due and still have delivery attempts left.
    pub fn due_pending_tasks(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<NotificationTask>> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM notification_tasks
                 WHERE status = 'pending' AND scheduled_time <= ?1 AND attempts < ?2
                 ORDER BY scheduled_time, id"
            ),
            params![format_ts(now), max_attempts],
        )
    }

    /// pending → sent. Returns false if the task was not pending.
    pub fn mark_task_sent(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE notification_tasks SET status = 'sent', sent_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id, format_ts(now)],
            )
            .map_err(db_err("Mark sent"))?;
        Ok(changed > 0)
    }

    /// pending|sent → read. Returns false if already read or missing.
    pub fn mark_task_read(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE notification_tasks SET status = 'read', read_at = ?2
                 WHERE id = ?1 AND status <> 'read'",
                params![id, format_ts(now)],
            )
            .map_err(db_err("Mark read"))?;
        Ok(changed > 0)
    }

    pub fn record_delivery_round(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE notification_tasks SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )
        .map_err(db_err("Record attempt"))?;
        Ok(())
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM notification_tasks WHERE id = ?1", params![id])
            .map_err(db_err("Delete task"))?;
        Ok(changed > 0)
    }

    /// Tasks whose related entity no longer exists.
    pub fn orphan_task_ids(&self) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT t.id FROM notification_tasks t
                 WHERE (t.related_type = 'node'
                        AND NOT EXISTS (SELECT 1 FROM process_nodes n WHERE n.id = t.related_id))
                    OR (t.related_type = 'cost'
                        AND NOT EXISTS (SELECT 1 FROM costs c WHERE c.id = t.related_id))
                    OR (t.related_type = 'task'
                        AND NOT EXISTS (SELECT 1 FROM notification_tasks o WHERE o.id = t.related_id))
                 ORDER BY t.id",
            )
            .map_err(db_err("Prepare"))?;
        let ids = stmt
            .query_map([], |r| r.get(0))
            .map_err(db_err("Query orphans"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    // ─── Send History ─────────────────────────────────────────

    pub fn insert_send_history(
        &self,
        notification_id: i64,
        send_method: &str,
        send_status: SendStatus,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SendHistory> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO send_history (notification_id, send_method, send_status, send_time, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![notification_id, send_method, send_status.as_str(), format_ts(now), detail],
        )
        .map_err(db_err("Insert send history"))?;
        Ok(SendHistory {
            id: conn.last_insert_rowid(),
            notification_id,
            send_method: send_method.to_string(),
            send_status,
            send_time: now,
            detail: detail.map(str::to_string),
        })
    }

    pub fn list_send_history(&self, notification_id: i64) -> Result<Vec<SendHistory>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, notification_id, send_method, send_status, send_time, detail
                 FROM send_history WHERE notification_id = ?1 ORDER BY id",
            )
            .map_err(db_err("Prepare"))?;
        let raw: Vec<(i64, i64, String, String, String, Option<String>)> = stmt
            .query_map(params![notification_id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })
            .map_err(db_err("Query send history"))?
            .filter_map(|r| r.ok())
            .collect();

        raw.into_iter()
            .map(|(id, notification_id, send_method, send_status, send_time, detail)| {
                Ok(SendHistory {
                    id,
                    notification_id,
                    send_method,
                    send_status: send_status.parse()?,
                    send_time: parse_ts(&send_time)?,
                    detail,
                })
            })
            .collect()
    }
}

// ─── Row decoding ─────────────────────────────────────────────

struct NodeRow {
    id: i64,
    case_id: i64,
    node_type: String,
    node_name: String,
    handler: Option<String>,
    start_time: Option<String>,
    deadline: Option<String>,
    completion_time: Option<String>,
    status: String,
    progress: i64,
    node_order: i32,
    created_at: String,
    updated_at: String,
}

impl NodeRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            case_id: r.get(1)?,
            node_type: r.get(2)?,
            node_name: r.get(3)?,
            handler: r.get(4)?,
            start_time: r.get(5)?,
            deadline: r.get(6)?,
            completion_time: r.get(7)?,
            status: r.get(8)?,
            progress: r.get(9)?,
            node_order: r.get(10)?,
            created_at: r.get(11)?,
            updated_at: r.get(12)?,
        })
    }

    fn into_node(self) -> Result<ProcessNode> {
        Ok(ProcessNode {
            id: self.id,
            case_id: self.case_id,
            node_type: self.node_type,
            node_name: self.node_name,
            handler: self.handler,
            start_time: parse_opt_ts(self.start_time)?,
            deadline: parse_opt_ts(self.deadline)?,
            completion_time: parse_opt_ts(self.completion_time)?,
            status: self.status.parse()?,
            progress: self.progress.clamp(0, 100) as u8,
            node_order: self.node_order,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

struct CostRow {
    id: i64,
    case_id: i64,
    cost_type: String,
    amount: f64,
    due_date: Option<String>,
    paid: bool,
}

impl CostRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            case_id: r.get(1)?,
            cost_type: r.get(2)?,
            amount: r.get(3)?,
            due_date: r.get(4)?,
            paid: r.get(5)?,
        })
    }

    fn into_cost(self) -> Result<CostRecord> {
        Ok(CostRecord {
            id: self.id,
            case_id: self.case_id,
            cost_type: self.cost_type,
            amount: self.amount,
            due_date: parse_opt_ts(self.due_date)?,
            paid: self.paid,
        })
    }
}

struct RuleRow {
    id: i64,
    name: String,
    rule_type: String,
    trigger_condition: String,
    threshold_value: i64,
    threshold_unit: String,
    frequency: String,
    recipients: String,
    is_enabled: bool,
    description: String,
    created_at: String,
    updated_at: String,
}

impl RuleRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            rule_type: r.get(2)?,
            trigger_condition: r.get(3)?,
            threshold_value: r.get(4)?,
            threshold_unit: r.get(5)?,
            frequency: r.get(6)?,
            recipients: r.get(7)?,
            is_enabled: r.get(8)?,
            description: r.get(9)?,
            created_at: r.get(10)?,
            updated_at: r.get(11)?,
        })
    }

    fn into_rule(self) -> Result<NotificationRule> {
        let bad = |e: DocketError| DocketError::Computation(format!("rule {}: {e}", self.id));
        Ok(NotificationRule {
            id: self.id,
            rule_type: self.rule_type.parse().map_err(bad)?,
            trigger_condition: self.trigger_condition.parse().map_err(bad)?,
            threshold_value: self.threshold_value,
            threshold_unit: self.threshold_unit.parse().map_err(bad)?,
            frequency: self.frequency.parse().map_err(bad)?,
            recipients: recipients_from_json(&self.recipients).map_err(|e| {
                DocketError::Computation(format!("rule {} recipients: {e}", self.id))
            })?,
            is_enabled: self.is_enabled,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            name: self.name,
            description: self.description,
        })
    }
}

struct TaskRow {
    id: i64,
    rule_id: Option<i64>,
    related_type: String,
    related_id: i64,
    task_type: String,
    scheduled_time: String,
    content: String,
    recipients: String,
    status: String,
    attempts: i64,
    created_at: String,
    sent_at: Option<String>,
    read_at: Option<String>,
}

impl TaskRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            rule_id: r.get(1)?,
            related_type: r.get(2)?,
            related_id: r.get(3)?,
            task_type: r.get(4)?,
            scheduled_time: r.get(5)?,
            content: r.get(6)?,
            recipients: r.get(7)?,
            status: r.get(8)?,
            attempts: r.get(9)?,
            created_at: r.get(10)?,
            sent_at: r.get(11)?,
            read_at: r.get(12)?,
        })
    }

    fn into_task(self) -> Result<NotificationTask> {
        Ok(NotificationTask {
            id: self.id,
            rule_id: self.rule_id,
            related: RelatedRef::from_parts(&self.related_type, self.related_id)?,
            task_type: self.task_type,
            scheduled_time: parse_ts(&self.scheduled_time)?,
            content: self.content,
            recipients: recipients_from_json(&self.recipients).map_err(|e| {
                DocketError::Computation(format!("task {} recipients: {e}", self.id))
            })?,
            status: self
                .status
                .parse()
                .map_err(|e| DocketError::Computation(format!("task {}: {e}", self.id)))?,
            attempts: self.attempts.max(0) as u32,
            created_at: parse_ts(&self.created_at)?,
            sent_at: parse_opt_ts(self.sent_at)?,
            read_at: parse_opt_ts(self.read_at)?,
        })
    }
}

// ─── Collaborator interfaces ──────────────────────────────────

impl CaseStore for DocketDb {
    fn find_case(&self, id: i64) -> Result<Option<Case>> {
        self.get_case(id)
    }

    fn update_case_status(&self, id: i64, status: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE cases SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status, format_ts(at)],
            )
            .map_err(db_err("Update case status"))?;
        if changed == 0 {
            return Err(DocketError::not_found("case", id));
        }
        Ok(())
    }
}

impl CaseLogStore for DocketDb {
    fn append_case_log(&self, entry: &NewCaseLog) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO case_logs (case_id, action, detail, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.case_id, entry.action, entry.detail.to_string(), format_ts(entry.created_at)],
        )
        .map_err(db_err("Append case log"))?;
        Ok(conn.last_insert_rowid())
    }
}

impl CostStore for DocketDb {
    fn unpaid_costs(&self) -> Result<Vec<CostRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, case_id, cost_type, amount, due_date, paid FROM costs
                 WHERE paid = 0 AND due_date IS NOT NULL ORDER BY due_date, id",
            )
            .map_err(db_err("Prepare"))?;
        let rows: Vec<CostRow> = stmt
            .query_map([], CostRow::read)
            .map_err(db_err("Query costs"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                row.into_cost()
                    .map_err(|e| tracing::warn!("⚠️ Skipping cost {id}: {e}"))
                    .ok()
            })
            .collect())
    }
}

impl EntityLookup for DocketDb {
    fn describe(&self, related: RelatedRef) -> Result<Option<EntitySummary>> {
        Ok(match related {
            RelatedRef::Node(id) => self.get_node(id)?.map(|n| EntitySummary {
                title: n.node_name,
                case_id: Some(n.case_id),
                handler: n.handler,
                due: n.deadline,
            }),
            RelatedRef::Cost(id) => self.get_cost(id)?.map(|c| EntitySummary {
                title: format!("{} ({:.2})", c.cost_type, c.amount),
                case_id: Some(c.case_id),
                handler: None,
                due: c.due_date,
            }),
            RelatedRef::Task(id) => self.get_task(id)?.map(|t| EntitySummary {
                title: format!("notification #{}", t.id),
                case_id: None,
                handler: None,
                due: Some(t.scheduled_time),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Recipient;
    use crate::tasks::MANUAL_TASK_TYPE;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    fn seeded() -> (DocketDb, Case) {
        let db = DocketDb::open_in_memory().unwrap();
        let case = db.insert_case("Wang v. Zhao", "审理中", ts("2024-10-01T00:00:00Z")).unwrap();
        (db, case)
    }

    fn new_node(name: &str, deadline: Option<&str>) -> NewNode {
        NewNode {
            node_type: "filing".into(),
            node_name: name.into(),
            deadline: deadline.map(ts),
            ..Default::default()
        }
    }

    fn manual_task(related: RelatedRef, at: &str) -> NewTask {
        NewTask {
            rule_id: None,
            related,
            task_type: MANUAL_TASK_TYPE.into(),
            scheduled_time: ts(at),
            content: "check file".into(),
            recipients: vec![Recipient::User { id: "u1".into() }],
        }
    }

    #[test]
    fn test_open_file_db_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("docket.db");
        {
            let db = DocketDb::open(&path).unwrap();
            db.insert_case("Persisted", "open", ts("2024-10-01T00:00:00Z")).unwrap();
        }
        let db = DocketDb::open(&path).unwrap();
        assert_eq!(db.get_case(1).unwrap().unwrap().title, "Persisted");
    }

    #[test]
    fn test_node_order_appends() {
        let (db, case) = seeded();
        let now = ts("2024-10-01T00:00:00Z");
        let a = db.insert_node(case.id, &new_node("A", None), NodeStatus::Pending, now).unwrap();
        let b = db.insert_node(case.id, &new_node("B", None), NodeStatus::Pending, now).unwrap();
        assert_eq!(a.node_order, 1);
        assert_eq!(b.node_order, 2);
        let names: Vec<_> =
            db.list_case_nodes(case.id).unwrap().into_iter().map(|n| n.node_name).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_node_requires_existing_case() {
        let db = DocketDb::open_in_memory().unwrap();
        let err = db.insert_node(99, &new_node("A", None), NodeStatus::Pending, ts("2024-10-01T00:00:00Z"));
        assert!(matches!(err, Err(DocketError::Database(_))));
    }

    #[test]
    fn test_bulk_update_only_touches_changed_rows() {
        let (db, case) = seeded();
        let created = ts("2024-10-01T00:00:00Z");
        db.insert_node(case.id, &new_node("late", Some("2024-10-10T00:00:00Z")), NodeStatus::Pending, created)
            .unwrap();
        db.insert_node(case.id, &new_node("future", Some("2024-12-01T00:00:00Z")), NodeStatus::Pending, created)
            .unwrap();

        let now = ts("2024-10-15T00:00:00Z");
        assert_eq!(db.bulk_update_statuses(now).unwrap(), 1);
        assert_eq!(db.bulk_update_statuses(now).unwrap(), 0);
        assert_eq!(db.nodes_with_status(NodeStatus::Overdue).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_rows_are_skipped_in_lists() {
        let (db, case) = seeded();
        let created = ts("2024-10-01T00:00:00Z");
        let good = db.insert_node(case.id, &new_node("good", None), NodeStatus::Pending, created).unwrap();
        let bad = db.insert_node(case.id, &new_node("bad", None), NodeStatus::Pending, created).unwrap();
        db.lock()
            .unwrap()
            .execute("UPDATE process_nodes SET deadline = 'next tuesday' WHERE id = ?1", params![bad.id])
            .unwrap();

        let listed = db.list_case_nodes(case.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, good.id);
        assert!(matches!(db.get_node(bad.id), Err(DocketError::Computation(_))));
        // the sweep leaves the malformed row alone
        assert_eq!(db.bulk_update_statuses(ts("2024-10-15T00:00:00Z")).unwrap(), 0);
    }

    #[test]
    fn test_sweep_skips_malformed_completion_and_start() {
        let (db, case) = seeded();
        let created = ts("2024-10-01T00:00:00Z");
        let done = db.insert_node(case.id, &new_node("done?", None), NodeStatus::Pending, created).unwrap();
        let started = db.insert_node(case.id, &new_node("started?", None), NodeStatus::Pending, created).unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "UPDATE process_nodes SET completion_time = 'not a date' WHERE id = ?1",
                params![done.id],
            )
            .unwrap();
            conn.execute(
                "UPDATE process_nodes SET start_time = 'last week' WHERE id = ?1",
                params![started.id],
            )
            .unwrap();
        }

        assert_eq!(db.bulk_update_statuses(ts("2024-10-15T00:00:00Z")).unwrap(), 0);
        assert!(matches!(db.get_node(done.id), Err(DocketError::Computation(_))));
        assert!(matches!(db.get_node(started.id), Err(DocketError::Computation(_))));
        assert!(db.fully_completed_case_ids().unwrap().is_empty());

        // a stored 'completed' with an unparseable completion time never counts
        db.lock()
            .unwrap()
            .execute("UPDATE process_nodes SET status = 'completed'", [])
            .unwrap();
        assert!(db.fully_completed_case_ids().unwrap().is_empty());
        assert_eq!(db.case_completion(case.id).unwrap(), (2, 0));
    }

    #[test]
    fn test_fully_completed_cases() {
        let (db, case) = seeded();
        let other = db.insert_case("Other", "open", ts("2024-10-01T00:00:00Z")).unwrap();
        let now = ts("2024-10-01T00:00:00Z");
        db.insert_node(case.id, &new_node("A", None), NodeStatus::Completed, now).unwrap();
        db.insert_node(other.id, &new_node("B", None), NodeStatus::Completed, now).unwrap();
        db.insert_node(other.id, &new_node("C", None), NodeStatus::Pending, now).unwrap();
        assert_eq!(db.fully_completed_case_ids().unwrap(), vec![case.id]);
    }

    #[test]
    fn test_compare_and_write_status() {
        let (db, case) = seeded();
        let now = ts("2024-10-01T00:00:00Z");
        let n = db.insert_node(case.id, &new_node("A", None), NodeStatus::Pending, now).unwrap();
        assert!(!db.update_node_status_if(n.id, NodeStatus::Overdue, NodeStatus::Completed, now).unwrap());
        assert!(db.update_node_status_if(n.id, NodeStatus::Pending, NodeStatus::InProgress, now).unwrap());
        assert_eq!(db.get_node(n.id).unwrap().unwrap().status, NodeStatus::InProgress);
    }

    #[test]
    fn test_task_lifecycle_and_unread_count() {
        let (db, case) = seeded();
        let now = ts("2024-10-15T00:00:00Z");
        let node = db.insert_node(case.id, &new_node("A", None), NodeStatus::Pending, now).unwrap();
        let t1 = db.insert_task(&manual_task(RelatedRef::Node(node.id), "2024-10-15T00:00:00Z"), now).unwrap();
        let t2 = db.insert_task(&manual_task(RelatedRef::Node(node.id), "2024-10-20T00:00:00Z"), now).unwrap();
        assert_eq!(t1.status, TaskStatus::Pending);
        assert_eq!(db.unread_count().unwrap(), 2);

        let due = db.due_pending_tasks(now, 3).unwrap();
        assert_eq!(due.iter().map(|t| t.id).collect::<Vec<_>>(), vec![t1.id]);

        assert!(db.mark_task_sent(t1.id, now).unwrap());
        assert!(!db.mark_task_sent(t1.id, now).unwrap());
        assert!(db.mark_task_read(t1.id, now).unwrap());
        assert!(!db.mark_task_read(t1.id, now).unwrap());
        assert_eq!(db.unread_count().unwrap(), 1);

        let read = db
            .list_tasks(&TaskFilter { status: Some("read".into()), ..Default::default() })
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].id, t1.id);
        assert!(read[0].read_at.is_some());

        assert!(db.delete_task(t2.id).unwrap());
        assert!(db.get_task(t2.id).unwrap().is_none());
    }

    #[test]
    fn test_list_tasks_rejects_unknown_filters() {
        let db = DocketDb::open_in_memory().unwrap();
        let bad = TaskFilter { status: Some("archived".into()), ..Default::default() };
        assert!(matches!(db.list_tasks(&bad), Err(DocketError::Validation(_))));
        let bad = TaskFilter { related_type: Some("case".into()), ..Default::default() };
        assert!(matches!(db.list_tasks(&bad), Err(DocketError::Validation(_))));
    }

    #[test]
    fn test_attempt_limit_excludes_task() {
        let (db, case) = seeded();
        let now = ts("2024-10-15T00:00:00Z");
        let t = db.insert_task(&manual_task(RelatedRef::Node(case.id), "2024-10-15T00:00:00Z"), now).unwrap();
        db.record_delivery_round(t.id).unwrap();
        db.record_delivery_round(t.id).unwrap();
        assert_eq!(db.due_pending_tasks(now, 3).unwrap().len(), 1);
        db.record_delivery_round(t.id).unwrap();
        assert!(db.due_pending_tasks(now, 3).unwrap().is_empty());
    }

    #[test]
    fn test_send_history_cascades_with_task() {
        let (db, case) = seeded();
        let now = ts("2024-10-15T00:00:00Z");
        let node = db.insert_node(case.id, &new_node("A", None), NodeStatus::Pending, now).unwrap();
        let t = db.insert_task(&manual_task(RelatedRef::Node(node.id), "2024-10-15T00:00:00Z"), now).unwrap();
        db.insert_send_history(t.id, "in_app", SendStatus::Success, None, now).unwrap();
        db.insert_send_history(t.id, "webhook", SendStatus::Failure, Some("HTTP 500"), now).unwrap();
        let history = db.list_send_history(t.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].detail.as_deref(), Some("HTTP 500"));

        db.delete_task(t.id).unwrap();
        assert!(db.list_send_history(t.id).unwrap().is_empty());
    }

    #[test]
    fn test_orphans_and_describe() {
        let (db, case) = seeded();
        let now = ts("2024-10-15T00:00:00Z");
        let node = db.insert_node(case.id, &new_node("Hearing", None), NodeStatus::Pending, now).unwrap();
        let cost = db.insert_cost(case.id, "court fee", 120.5, None, now).unwrap();
        let on_node = db.insert_task(&manual_task(RelatedRef::Node(node.id), "2024-10-15T00:00:00Z"), now).unwrap();
        db.insert_task(&manual_task(RelatedRef::Cost(cost.id), "2024-10-15T00:00:00Z"), now).unwrap();

        assert_eq!(
            db.describe(RelatedRef::Cost(cost.id)).unwrap().unwrap().title,
            "court fee (120.50)"
        );
        assert!(db.orphan_task_ids().unwrap().is_empty());

        db.delete_node(node.id).unwrap();
        assert!(db.describe(RelatedRef::Node(node.id)).unwrap().is_none());
        assert_eq!(db.orphan_task_ids().unwrap(), vec![on_node.id]);
    }

    #[test]
    fn test_rule_toggle_and_enabled_filter() {
        use crate::rules::RuleInput;
        let db = DocketDb::open_in_memory().unwrap();
        let now = ts("2024-10-15T00:00:00Z");
        let draft = RuleInput {
            rule_type: Some("cost_due".into()),
            trigger_condition: Some("on_due_date".into()),
            threshold_value: Some(0),
            threshold_unit: Some("days".into()),
            frequency: Some("once".into()),
            recipients: Some(vec![Recipient::Role { name: "finance".into() }]),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let rule = db.insert_rule(&draft, now).unwrap();
        assert_eq!(rule.name, "cost_due on_due_date");
        assert_eq!(db.enabled_rules().unwrap().len(), 1);

        assert!(db.set_rule_enabled(rule.id, false, now).unwrap());
        assert!(db.enabled_rules().unwrap().is_empty());
        assert_eq!(db.list_rules().unwrap().len(), 1);

        assert!(db.delete_rule(rule.id).unwrap());
        assert!(!db.delete_rule(rule.id).unwrap());
    }
}
