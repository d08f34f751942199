//! Notification task queue: pending → sent → read.
//!
//! Every delivery attempt on every channel is written to `send_history`.
//! A task becomes `sent` once any channel succeeds; otherwise it stays
//! `pending` and is retried on later ticks until the attempt limit is reached.
//! `read` is terminal and re-marking is a no-op.

use std::sync::Arc;

use docket_core::error::{DocketError, Result};
use serde::Serialize;

use crate::clock::{Clock, system_clock};
use crate::dispatch::Dispatcher;
use crate::notify::OutboundNotification;
use crate::persistence::DocketDb;
use crate::store::EntityLookup;
use crate::tasks::{NewTask, NotificationTask, SendHistory, SendStatus, TaskFilter};

/// `send_method` recorded when the related entity cannot be resolved.
const LOOKUP_METHOD: &str = "lookup";
const ENTITY_MISSING: &str = "related entity missing";

/// Result of one delivery round for one task.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub task_id: i64,
    pub sent: bool,
    pub orphaned: bool,
    pub history: Vec<SendHistory>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub orphaned: usize,
}

pub struct TaskQueue {
    db: Arc<DocketDb>,
    dispatcher: Arc<Dispatcher>,
    lookup: Arc<dyn EntityLookup>,
    clock: Clock,
    max_send_attempts: u32,
}

impl TaskQueue {
    pub fn new(db: Arc<DocketDb>, dispatcher: Arc<Dispatcher>, max_send_attempts: u32) -> Self {
        Self {
            lookup: db.clone(),
            db,
            dispatcher,
            clock: system_clock(),
            max_send_attempts: max_send_attempts.max(1),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve related entities through an external system.
    pub fn with_lookup(mut self, lookup: Arc<dyn EntityLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Queue a task by hand.
    pub fn enqueue(&self, task: &NewTask) -> Result<NotificationTask> {
        if task.content.trim().is_empty() {
            return Err(DocketError::validation("content is required"));
        }
        self.db.insert_task(task, (self.clock)())
    }

    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<NotificationTask>> {
        self.db.list_tasks(filter)
    }

    pub fn get(&self, id: i64) -> Result<NotificationTask> {
        self.db.get_task(id)?.ok_or(DocketError::not_found("task", id))
    }

    pub fn unread_count(&self) -> Result<i64> {
        self.db.unread_count()
    }

    /// Mark as read. Already-read tasks are returned unchanged.
    pub fn mark_read(&self, id: i64) -> Result<NotificationTask> {
        if !self.db.mark_task_read(id, (self.clock)())? {
            tracing::debug!("Task {id} already read or missing");
        }
        self.get(id)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        if !self.db.delete_task(id)? {
            return Err(DocketError::not_found("task", id));
        }
        Ok(())
    }

    pub fn send_history(&self, id: i64) -> Result<Vec<SendHistory>> {
        self.get(id)?;
        self.db.list_send_history(id)
    }

    /// Deliver one task now, regardless of its schedule or attempt count.
    pub async fn send(&self, id: i64) -> Result<DeliveryOutcome> {
        let task = self.get(id)?;
        self.deliver(&task).await
    }

    /// Deliver every due pending task. Per-task failures never abort the round.
    pub async fn dispatch_due(&self) -> Result<DispatchReport> {
        let due = self.db.due_pending_tasks((self.clock)(), self.max_send_attempts)?;
        let mut report = DispatchReport { attempted: due.len(), ..Default::default() };

        for task in &due {
            match self.deliver(task).await {
                Ok(outcome) if outcome.sent => report.sent += 1,
                Ok(outcome) if outcome.orphaned => report.orphaned += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Delivery of task {} failed: {e}", task.id);
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                "📨 Dispatched {} task(s): {} sent, {} failed, {} orphaned",
                report.attempted,
                report.sent,
                report.failed,
                report.orphaned
            );
        }
        Ok(report)
    }

    async fn deliver(&self, task: &NotificationTask) -> Result<DeliveryOutcome> {
        let summary = match self.lookup.describe(task.related) {
            Ok(Some(summary)) => summary,
            Ok(None) => {
                tracing::warn!("⚠️ Task {} refers to missing {}", task.id, task.related);
                return self.fail_lookup(task, ENTITY_MISSING, true);
            }
            Err(e) => {
                tracing::warn!("⚠️ Task {}: cannot resolve {}: {e}", task.id, task.related);
                return self.fail_lookup(task, &e.to_string(), false);
            }
        };

        let notification = OutboundNotification::from_task(task, &summary.title);
        let targets = self.dispatcher.targets_for(&task.recipients, summary.handler.as_deref());

        let mut history = Vec::with_capacity(targets.len());
        let mut any_success = false;
        for target in &targets {
            let result = self.dispatcher.dispatch(&notification, target).await;
            let (status, detail) = match &result {
                Ok(()) => (SendStatus::Success, None),
                Err(e) => {
                    tracing::warn!("⚠️ Task {} via {}: {e}", task.id, target.describe());
                    (SendStatus::Failure, Some(e.to_string()))
                }
            };
            any_success |= result.is_ok();
            history.push(self.db.insert_send_history(
                task.id,
                target.method(),
                status,
                detail.as_deref(),
                (self.clock)(),
            )?);
        }

        if any_success {
            self.db.mark_task_sent(task.id, (self.clock)())?;
        } else {
            self.db.record_delivery_round(task.id)?;
        }
        Ok(DeliveryOutcome { task_id: task.id, sent: any_success, orphaned: false, history })
    }

    fn fail_lookup(
        &self,
        task: &NotificationTask,
        detail: &str,
        orphaned: bool,
    ) -> Result<DeliveryOutcome> {
        let row = self.db.insert_send_history(
            task.id,
            LOOKUP_METHOD,
            SendStatus::Failure,
            Some(detail),
            (self.clock)(),
        )?;
        self.db.record_delivery_round(task.id)?;
        Ok(DeliveryOutcome { task_id: task.id, sent: false, orphaned, history: vec![row] })
    }

    /// Delete tasks whose related entity no longer exists. Returns how many.
    pub fn purge_orphans(&self) -> Result<usize> {
        let ids = self.db.orphan_task_ids()?;
        let mut removed = 0;
        for id in ids {
            if self.db.delete_task(id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("🧹 Purged {removed} orphaned notification task(s)");
        }
        Ok(removed)
    }
}
