//! Process node lifecycle: status recomputation, cascading case closure,
//! and overdue/upcoming aggregates.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use docket_core::config::LifecycleConfig;
use docket_core::error::{DocketError, Result};
use serde::Serialize;

use crate::clock::{Clock, system_clock};
use crate::nodes::{NewNode, NodeUpdate, ProcessNode};
use crate::persistence::DocketDb;
use crate::status::{NodeStatus, OverdueInfo, calculate_status};
use crate::store::{CASE_STATUS_CHANGE, CaseLogStore, CaseStore, NewCaseLog};

/// Widest look-ahead accepted by [`LifecycleService::upcoming_nodes`].
pub const MAX_UPCOMING_DAYS: u32 = 3650;

/// `GET /nodes/:id/detail` payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetail {
    pub node: ProcessNode,
    pub calculated_status: NodeStatus,
    pub overdue_info: OverdueInfo,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecalc {
    pub case_id: i64,
    pub updated: usize,
    pub closed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub updated: usize,
    pub cases_closed: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueNode {
    #[serde(flatten)]
    pub node: ProcessNode,
    pub overdue_days: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseOverdue {
    pub case_id: i64,
    pub nodes: Vec<OverdueNode>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueStatistics {
    pub total: usize,
    pub affected_cases: usize,
    /// Overdue nodes grouped by case, lowest case id first.
    pub nodes: Vec<CaseOverdue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpcomingNodes {
    pub nodes: Vec<ProcessNode>,
    pub threshold: u32,
}

/// Recomputes node statuses and closes cases whose nodes are all completed.
pub struct LifecycleService {
    db: Arc<DocketDb>,
    cases: Arc<dyn CaseStore>,
    logs: Arc<dyn CaseLogStore>,
    closed_status: String,
    clock: Clock,
}

impl LifecycleService {
    pub fn new(db: Arc<DocketDb>, config: &LifecycleConfig) -> Self {
        Self {
            cases: db.clone(),
            logs: db.clone(),
            db,
            closed_status: config.closed_status.clone(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Use external case and case-log systems instead of the local tables.
    pub fn with_case_store(
        mut self,
        cases: Arc<dyn CaseStore>,
        logs: Arc<dyn CaseLogStore>,
    ) -> Self {
        self.cases = cases;
        self.logs = logs;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn closed_status(&self) -> &str {
        &self.closed_status
    }

    fn require_node(&self, id: i64) -> Result<ProcessNode> {
        self.db.get_node(id)?.ok_or(DocketError::not_found("node", id))
    }

    // ─── Recalculation ────────────────────────────────────────

    /// Recompute one node. The row is written only when the status changes.
    pub fn recalculate_one(&self, id: i64) -> Result<ProcessNode> {
        let mut node = self.require_node(id)?;
        self.refresh(&mut node)?;
        Ok(node)
    }

    /// Returns whether the stored status changed.
    fn refresh(&self, node: &mut ProcessNode) -> Result<bool> {
        let now = self.now();
        let status = node.calculated_status(now);
        if status == node.status {
            return Ok(false);
        }
        // a concurrent writer got there first: keep its value, next sweep reconciles
        if !self.db.update_node_status_if(node.id, node.status, status, now)? {
            tracing::debug!("Node {} changed underneath recompute, skipped", node.id);
            return Ok(false);
        }
        tracing::debug!("Node {} status {} → {}", node.id, node.status, status);
        node.status = status;
        node.updated_at = now;
        Ok(true)
    }

    /// Recompute every node of a case, then close the case if all nodes are completed.
    pub fn recalculate_case(&self, case_id: i64) -> Result<CaseRecalc> {
        if self.cases.find_case(case_id)?.is_none() {
            return Err(DocketError::not_found("case", case_id));
        }

        let mut updated = 0;
        for mut node in self.db.list_case_nodes(case_id)? {
            match self.refresh(&mut node) {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("⚠️ Recompute of node {} failed: {e}", node.id),
            }
        }

        let closed = self.close_if_complete(case_id)?;
        Ok(CaseRecalc { case_id, updated, closed })
    }

    /// Close the case when it has nodes, all completed, and is not already closed.
    /// Appends exactly one case-log entry per closure.
    pub fn close_if_complete(&self, case_id: i64) -> Result<bool> {
        let (total, completed) = self.db.case_completion(case_id)?;
        if total == 0 || completed < total {
            return Ok(false);
        }
        let Some(case) = self.cases.find_case(case_id)? else {
            tracing::warn!("⚠️ Case {case_id} has nodes but no case record");
            return Ok(false);
        };
        if case.status == self.closed_status {
            return Ok(false);
        }

        let now = self.now();
        self.cases.update_case_status(case_id, &self.closed_status, now)?;
        self.logs.append_case_log(&NewCaseLog {
            case_id,
            action: CASE_STATUS_CHANGE.to_string(),
            detail: serde_json::json!({
                "from": case.status,
                "to": self.closed_status,
                "auto_closed": true,
                "reason": "all process nodes completed",
            }),
            created_at: now,
        })?;
        tracing::info!(
            "📁 Case #{} auto-closed ({} → {})",
            case_id,
            case.status,
            self.closed_status
        );
        Ok(true)
    }

    /// Sweep all nodes with the bulk status update, then close any case whose
    /// nodes are all completed. Per-case failures are logged and skipped.
    pub fn recalculate_all(&self) -> Result<SweepReport> {
        let updated = self.db.bulk_update_statuses(self.now())?;

        let mut cases_closed = Vec::new();
        for case_id in self.db.fully_completed_case_ids()? {
            match self.close_if_complete(case_id) {
                Ok(true) => cases_closed.push(case_id),
                Ok(false) => {}
                Err(e) => tracing::warn!("⚠️ Closure check for case {case_id} failed: {e}"),
            }
        }

        if updated > 0 || !cases_closed.is_empty() {
            tracing::info!(
                "🔄 Status sweep: {} node(s) updated, {} case(s) closed",
                updated,
                cases_closed.len()
            );
        }
        Ok(SweepReport { updated, cases_closed })
    }

    // ─── Aggregates ───────────────────────────────────────────

    pub fn check_overdue(&self, node: &ProcessNode) -> OverdueInfo {
        node.overdue_info(self.now())
    }

    pub fn node_detail(&self, id: i64) -> Result<NodeDetail> {
        let node = self.require_node(id)?;
        let now = self.now();
        Ok(NodeDetail {
            calculated_status: node.calculated_status(now),
            overdue_info: node.overdue_info(now),
            node,
        })
    }

    /// Overdue nodes grouped by case. Reads the stored status, so it reflects
    /// the most recent sweep.
    pub fn overdue_statistics(&self) -> Result<OverdueStatistics> {
        let now = self.now();
        let overdue = self.db.nodes_with_status(NodeStatus::Overdue)?;
        let total = overdue.len();

        let mut by_case: BTreeMap<i64, Vec<OverdueNode>> = BTreeMap::new();
        for node in overdue {
            let overdue_days = node.overdue_info(now).overdue_days;
            by_case
                .entry(node.case_id)
                .or_default()
                .push(OverdueNode { node, overdue_days });
        }

        Ok(OverdueStatistics {
            total,
            affected_cases: by_case.len(),
            nodes: by_case
                .into_iter()
                .map(|(case_id, nodes)| CaseOverdue { case_id, nodes })
                .collect(),
        })
    }

    /// Unfinished nodes whose deadline falls within `[now, now + days]`.
    pub fn upcoming_nodes(&self, days: u32) -> Result<UpcomingNodes> {
        if days > MAX_UPCOMING_DAYS {
            return Err(DocketError::Validation(format!(
                "days must be between 0 and {MAX_UPCOMING_DAYS}"
            )));
        }
        let now = self.now();
        let until = Duration::try_days(i64::from(days))
            .and_then(|span| now.checked_add_signed(span))
            .ok_or_else(|| DocketError::Computation(format!("upcoming window of {days} days overflows")))?;
        let nodes = self.db.nodes_due_between(now, until)?;
        Ok(UpcomingNodes { nodes, threshold: days })
    }

    // ─── Node CRUD ────────────────────────────────────────────

    pub fn list_case_nodes(&self, case_id: i64) -> Result<Vec<ProcessNode>> {
        if self.cases.find_case(case_id)?.is_none() {
            return Err(DocketError::not_found("case", case_id));
        }
        self.db.list_case_nodes(case_id)
    }

    pub fn add_node(&self, case_id: i64, new: &NewNode) -> Result<ProcessNode> {
        new.validate()?;
        if self.cases.find_case(case_id)?.is_none() {
            return Err(DocketError::not_found("case", case_id));
        }
        let now = self.now();
        let status = calculate_status(
            &crate::status::StatusInputs {
                completion_time: None,
                deadline: new.deadline,
                start_time: new.start_time,
            },
            now,
        );
        let node = self.db.insert_node(case_id, new, status, now)?;
        tracing::info!("➕ Node #{} '{}' added to case #{}", node.id, node.node_name, case_id);
        Ok(node)
    }

    /// Apply a partial update, recompute the node, then re-evaluate case closure.
    pub fn update_node(&self, id: i64, update: &NodeUpdate) -> Result<ProcessNode> {
        let mut node = self.require_node(id)?;
        let now = self.now();
        update.apply(&mut node, now)?;
        if let (Some(start), Some(deadline)) = (node.start_time, node.deadline)
            && deadline < start
        {
            return Err(DocketError::validation("deadline precedes start_time"));
        }
        node.status = node.calculated_status(now);
        node.updated_at = now;
        self.db.save_node(&node, now)?;

        if let Err(e) = self.close_if_complete(node.case_id) {
            tracing::warn!("⚠️ Closure check for case {} failed: {e}", node.case_id);
        }
        Ok(node)
    }

    pub fn delete_node(&self, id: i64) -> Result<()> {
        let node = self.require_node(id)?;
        if !self.db.delete_node(id)? {
            return Err(DocketError::not_found("node", id));
        }
        tracing::info!("🗑️ Node #{} removed from case #{}", id, node.case_id);
        if let Err(e) = self.close_if_complete(node.case_id) {
            tracing::warn!("⚠️ Closure check for case {} failed: {e}", node.case_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::clock::{fixed_clock, parse_ts};
    use crate::store::Case;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    const NOW: &str = "2024-10-15T00:00:00Z";

    fn service(db: &Arc<DocketDb>) -> LifecycleService {
        LifecycleService::new(db.clone(), &LifecycleConfig::default()).with_clock(fixed_clock(ts(NOW)))
    }

    fn node(name: &str, deadline: Option<&str>) -> NewNode {
        NewNode {
            node_type: "procedure".into(),
            node_name: name.into(),
            deadline: deadline.map(ts),
            ..Default::default()
        }
    }

    fn complete(svc: &LifecycleService, id: i64) {
        svc.update_node(
            id,
            &NodeUpdate { completion_time: Some(ts("2024-10-14T00:00:00Z")), ..Default::default() },
        )
        .unwrap();
    }

    /// Counts writes while delegating to the real store.
    struct CountingStore {
        inner: Arc<DocketDb>,
        status_writes: AtomicUsize,
        log_writes: AtomicUsize,
    }

    impl CaseStore for CountingStore {
        fn find_case(&self, id: i64) -> Result<Option<Case>> {
            self.inner.find_case(id)
        }
        fn update_case_status(&self, id: i64, status: &str, at: DateTime<Utc>) -> Result<()> {
            self.status_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.update_case_status(id, status, at)
        }
    }

    impl CaseLogStore for CountingStore {
        fn append_case_log(&self, entry: &NewCaseLog) -> Result<i64> {
            self.log_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.append_case_log(entry)
        }
    }

    #[test]
    fn test_overdue_scenario() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        let case = db.insert_case("Case", "审理中", ts("2024-10-01T00:00:00Z")).unwrap();
        let n = svc.add_node(case.id, &node("Evidence", Some("2024-10-10T00:00:00Z"))).unwrap();
        assert_eq!(n.status, NodeStatus::Overdue);

        let detail = svc.node_detail(n.id).unwrap();
        assert_eq!(detail.calculated_status, NodeStatus::Overdue);
        assert_eq!(detail.overdue_info, OverdueInfo { is_overdue: true, overdue_days: 5 });
    }

    #[test]
    fn test_recalculate_one_missing_node() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let err = service(&db).recalculate_one(404).unwrap_err();
        assert!(matches!(err, DocketError::NotFound { kind: "node", id: 404 }));
    }

    #[test]
    fn test_recalculate_one_writes_only_on_change() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let case = db.insert_case("Case", "open", ts("2024-10-01T00:00:00Z")).unwrap();
        // stored as pending; by NOW the deadline has passed
        let created = db
            .insert_node(case.id, &node("A", Some("2024-10-10T00:00:00Z")), NodeStatus::Pending, ts("2024-10-01T00:00:00Z"))
            .unwrap();

        let svc = service(&db);
        let first = svc.recalculate_one(created.id).unwrap();
        assert_eq!(first.status, NodeStatus::Overdue);
        assert_eq!(first.updated_at, ts(NOW));

        let stored_before = db.get_node(created.id).unwrap().unwrap().updated_at;
        let later = LifecycleService::new(db.clone(), &LifecycleConfig::default())
            .with_clock(fixed_clock(ts("2024-10-16T00:00:00Z")));
        later.recalculate_one(created.id).unwrap();
        assert_eq!(db.get_node(created.id).unwrap().unwrap().updated_at, stored_before);
    }

    #[test]
    fn test_case_with_overdue_node_stays_open() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        let case = db.insert_case("Case", "审理中", ts("2024-10-01T00:00:00Z")).unwrap();
        let a = svc.add_node(case.id, &node("A", None)).unwrap();
        let b = svc.add_node(case.id, &node("B", None)).unwrap();
        svc.add_node(case.id, &node("C", Some("2024-10-10T00:00:00Z"))).unwrap();
        complete(&svc, a.id);
        complete(&svc, b.id);

        let result = svc.recalculate_case(case.id).unwrap();
        assert!(!result.closed);
        assert_eq!(db.get_case(case.id).unwrap().unwrap().status, "审理中");
        assert!(db.list_case_logs(case.id).unwrap().is_empty());
    }

    #[test]
    fn test_all_completed_closes_case_once() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let case = db.insert_case("Case", "审理中", ts("2024-10-01T00:00:00Z")).unwrap();
        let now = ts("2024-10-01T00:00:00Z");
        for name in ["A", "B", "C"] {
            db.insert_node(case.id, &node(name, None), NodeStatus::Pending, now).unwrap();
        }
        db.lock_for_tests()
            .execute(
                "UPDATE process_nodes SET completion_time = '2024-10-14T00:00:00.000Z', progress = 100",
                [],
            )
            .unwrap();

        let counting = Arc::new(CountingStore {
            inner: db.clone(),
            status_writes: AtomicUsize::new(0),
            log_writes: AtomicUsize::new(0),
        });
        let svc = service(&db).with_case_store(counting.clone(), counting.clone());

        let first = svc.recalculate_case(case.id).unwrap();
        assert!(first.closed);
        assert_eq!(first.updated, 3);
        assert_eq!(db.get_case(case.id).unwrap().unwrap().status, "closed");

        let logs = db.list_case_logs(case.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, CASE_STATUS_CHANGE);
        assert_eq!(logs[0].detail["auto_closed"], serde_json::json!(true));
        assert_eq!(logs[0].detail["from"], serde_json::json!("审理中"));

        // idempotent: nothing further is written
        let second = svc.recalculate_case(case.id).unwrap();
        assert!(!second.closed);
        assert_eq!(second.updated, 0);
        assert_eq!(counting.status_writes.load(Ordering::SeqCst), 1);
        assert_eq!(counting.log_writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recalculate_all_sweeps_and_self_heals_closure() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        let open_case = db.insert_case("Open", "审理中", ts("2024-10-01T00:00:00Z")).unwrap();
        let done_case = db.insert_case("Done", "审理中", ts("2024-10-01T00:00:00Z")).unwrap();

        let created = ts("2024-10-01T00:00:00Z");
        db.insert_node(open_case.id, &node("late", Some("2024-10-10T00:00:00Z")), NodeStatus::Pending, created)
            .unwrap();
        // completed node whose case closure was interrupted
        let finished = db.insert_node(done_case.id, &node("done", None), NodeStatus::Completed, created).unwrap();
        db.lock_for_tests()
            .execute(
                "UPDATE process_nodes SET completion_time = '2024-10-02T00:00:00.000Z' WHERE id = ?1",
                [finished.id],
            )
            .unwrap();

        let report = svc.recalculate_all().unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.cases_closed, vec![done_case.id]);

        let again = svc.recalculate_all().unwrap();
        assert_eq!(again.updated, 0);
        assert!(again.cases_closed.is_empty());
        assert_eq!(db.list_case_logs(done_case.id).unwrap().len(), 1);
    }

    #[test]
    fn test_overdue_statistics_groups_by_case() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        let c1 = db.insert_case("One", "open", ts("2024-10-01T00:00:00Z")).unwrap();
        let c2 = db.insert_case("Two", "open", ts("2024-10-01T00:00:00Z")).unwrap();
        svc.add_node(c1.id, &node("a", Some("2024-10-10T00:00:00Z"))).unwrap();
        svc.add_node(c1.id, &node("b", Some("2024-10-14T12:00:00Z"))).unwrap();
        svc.add_node(c2.id, &node("c", Some("2024-10-01T00:00:00Z"))).unwrap();
        svc.add_node(c2.id, &node("d", Some("2024-11-01T00:00:00Z"))).unwrap();

        let stats = svc.overdue_statistics().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.affected_cases, 2);
        assert_eq!(stats.nodes[0].case_id, c1.id);
        assert_eq!(stats.nodes[0].nodes.len(), 2);
        assert_eq!(stats.nodes[1].nodes[0].overdue_days, 14);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["affectedCases"], serde_json::json!(2));
    }

    #[test]
    fn test_upcoming_excludes_completed_and_out_of_range() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        let case = db.insert_case("Case", "open", ts("2024-10-01T00:00:00Z")).unwrap();
        let soon = svc.add_node(case.id, &node("soon", Some("2024-10-17T00:00:00Z"))).unwrap();
        let done = svc.add_node(case.id, &node("done", Some("2024-10-18T00:00:00Z"))).unwrap();
        svc.add_node(case.id, &node("far", Some("2024-12-01T00:00:00Z"))).unwrap();
        svc.add_node(case.id, &node("past", Some("2024-10-10T00:00:00Z"))).unwrap();
        complete(&svc, done.id);

        let upcoming = svc.upcoming_nodes(7).unwrap();
        assert_eq!(upcoming.threshold, 7);
        assert_eq!(upcoming.nodes.iter().map(|n| n.id).collect::<Vec<_>>(), vec![soon.id]);
    }

    #[test]
    fn test_upcoming_window_is_bounded() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        assert!(svc.upcoming_nodes(MAX_UPCOMING_DAYS).is_ok());
        assert!(matches!(svc.upcoming_nodes(MAX_UPCOMING_DAYS + 1), Err(DocketError::Validation(_))));
        assert!(matches!(svc.upcoming_nodes(u32::MAX), Err(DocketError::Validation(_))));
    }

    #[test]
    fn test_closure_is_stamped_with_service_clock() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        let case = db.insert_case("Case", "审理中", ts("2024-10-01T00:00:00Z")).unwrap();
        let n = svc.add_node(case.id, &node("only", None)).unwrap();
        complete(&svc, n.id);

        let logs = db.list_case_logs(case.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].created_at, ts(NOW));
        let updated_at: String = db
            .lock_for_tests()
            .query_row("SELECT updated_at FROM cases WHERE id = ?1", [case.id], |r| r.get(0))
            .unwrap();
        assert_eq!(updated_at, "2024-10-15T00:00:00.000Z");
    }

    #[test]
    fn test_malformed_completion_never_closes_case() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        let case = db.insert_case("Case", "审理中", ts("2024-10-01T00:00:00Z")).unwrap();
        let n = db
            .insert_node(case.id, &node("only", Some("2024-10-20T00:00:00Z")), NodeStatus::Pending, ts(NOW))
            .unwrap();
        db.lock_for_tests()
            .execute("UPDATE process_nodes SET completion_time = 'not a date' WHERE id = ?1", [n.id])
            .unwrap();

        let report = svc.recalculate_all().unwrap();
        assert_eq!(report.updated, 0);
        assert!(report.cases_closed.is_empty());
        assert_eq!(db.get_case(case.id).unwrap().unwrap().status, "审理中");
        assert!(db.list_case_logs(case.id).unwrap().is_empty());
        assert!(matches!(svc.recalculate_one(n.id), Err(DocketError::Computation(_))));
    }

    #[test]
    fn test_update_node_progress_and_closure() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        let case = db.insert_case("Case", "审理中", ts("2024-10-01T00:00:00Z")).unwrap();
        let n = svc.add_node(case.id, &node("only", Some("2024-10-20T00:00:00Z"))).unwrap();

        let err = svc
            .update_node(n.id, &NodeUpdate { progress: Some(101), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, DocketError::Validation(_)));

        let updated = svc
            .update_node(n.id, &NodeUpdate { progress: Some(100), ..Default::default() })
            .unwrap();
        assert_eq!(updated.status, NodeStatus::Completed);
        assert_eq!(updated.completion_time, Some(ts(NOW)));
        assert_eq!(db.get_case(case.id).unwrap().unwrap().status, "closed");
    }

    #[test]
    fn test_add_node_to_missing_case() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let err = service(&db).add_node(9, &node("x", None)).unwrap_err();
        assert!(matches!(err, DocketError::NotFound { kind: "case", .. }));
    }

    #[test]
    fn test_delete_last_open_node_closes_case() {
        let db = Arc::new(DocketDb::open_in_memory().unwrap());
        let svc = service(&db);
        let case = db.insert_case("Case", "open", ts("2024-10-01T00:00:00Z")).unwrap();
        let a = svc.add_node(case.id, &node("a", None)).unwrap();
        let b = svc.add_node(case.id, &node("b", None)).unwrap();
        complete(&svc, a.id);
        assert_eq!(db.get_case(case.id).unwrap().unwrap().status, "open");

        svc.delete_node(b.id).unwrap();
        assert_eq!(db.get_case(case.id).unwrap().unwrap().status, "closed");
        assert!(matches!(svc.delete_node(b.id), Err(DocketError::NotFound { .. })));
    }
}
