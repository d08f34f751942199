//! Scheduler: the periodic tick that keeps node statuses current and turns
//! rules into notification tasks.
//! Uses tokio::interval between ticks; a tick that overruns its interval
//! finishes before the next one starts.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use docket_core::config::SchedulerConfig;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, offset_from_hours, system_clock};
use crate::lifecycle::LifecycleService;
use crate::persistence::DocketDb;
use crate::queue::TaskQueue;
use crate::rules::{Candidate, NotificationRule, RuleEngine, RuleType};
use crate::store::CostStore;

/// What one tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Another tick was already running; nothing was done.
    pub skipped: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub nodes_updated: usize,
    pub cases_closed: usize,
    pub rules_evaluated: usize,
    pub tasks_created: usize,
    pub tasks_suppressed: usize,
    pub tasks_dispatched: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub ticking: bool,
    pub interval_secs: u64,
    pub auto_dispatch: bool,
    pub tick_count: u64,
    pub last_report: Option<TickReport>,
}

#[derive(Default)]
struct Stats {
    tick_count: u64,
    last_report: Option<TickReport>,
}

/// Releases the tick flag when dropped, including on early return.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the background loop. `start`/`stop` control it; `tick` can also be
/// called directly (manual trigger) and shares the same non-reentrancy guard.
pub struct Scheduler {
    db: Arc<DocketDb>,
    lifecycle: Arc<LifecycleService>,
    queue: Arc<TaskQueue>,
    costs: Arc<dyn CostStore>,
    rules: RuleEngine,
    clock: Clock,
    interval: Duration,
    auto_dispatch: bool,
    running: AtomicBool,
    /// Bumped on every start so a loop from an earlier start exits.
    generation: AtomicU64,
    ticking: AtomicBool,
    shutdown: Notify,
    stats: Mutex<Stats>,
}

impl Scheduler {
    pub fn new(
        db: Arc<DocketDb>,
        lifecycle: Arc<LifecycleService>,
        queue: Arc<TaskQueue>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            rules: RuleEngine::new(db.clone(), offset_from_hours(config.utc_offset_hours)),
            costs: db.clone(),
            db,
            lifecycle,
            queue,
            clock: system_clock(),
            interval: Duration::from_secs(config.check_interval_secs.max(1)),
            auto_dispatch: config.auto_dispatch,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            ticking: AtomicBool::new(false),
            shutdown: Notify::new(),
            stats: Mutex::new(Stats::default()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Take cost-due candidates from an external cost system.
    pub fn with_cost_store(mut self, costs: Arc<dyn CostStore>) -> Self {
        self.costs = costs;
        self
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleService> {
        &self.lifecycle
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Spawn the background loop. Returns false if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("⏰ Scheduler started (check every {}s)", self.interval.as_secs());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = this.shutdown.notified() => break,
                }
                if !this.running.load(Ordering::SeqCst)
                    || this.generation.load(Ordering::SeqCst) != generation
                {
                    break;
                }
                this.tick().await;
            }
            tracing::info!("⏹️ Scheduler stopped");
        });
        true
    }

    /// Ask the loop to exit. A tick in progress runs to completion.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.shutdown.notify_waiters();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one evaluation cycle: recalculate all nodes, evaluate enabled rules
    /// against fresh candidates, then optionally dispatch due tasks.
    /// Returns a skipped report if a tick is already in progress.
    pub async fn tick(&self) -> TickReport {
        let Some(_guard) = TickGuard::acquire(&self.ticking) else {
            tracing::debug!("Tick already in progress, skipping");
            return TickReport { skipped: true, ..Default::default() };
        };

        let now = (self.clock)();
        // sweep and rule evaluation are rusqlite calls; keep them off the async workers
        let pass = EvaluationPass {
            db: self.db.clone(),
            lifecycle: self.lifecycle.clone(),
            costs: self.costs.clone(),
            rules: self.rules.clone(),
        };
        let mut report = match tokio::task::spawn_blocking(move || pass.run(now)).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("⚠️ Evaluation pass aborted: {e}");
                TickReport { errors: 1, ..Default::default() }
            }
        };
        report.started_at = Some(now);

        if self.auto_dispatch {
            match self.queue.dispatch_due().await {
                Ok(d) => report.tasks_dispatched = d.sent,
                Err(e) => {
                    tracing::warn!("⚠️ Dispatch failed: {e}");
                    report.errors += 1;
                }
            }
        }

        if report.tasks_created > 0 || report.tasks_dispatched > 0 {
            tracing::info!(
                "⏱️ Tick: {} node(s) updated, {} task(s) created, {} dispatched",
                report.nodes_updated,
                report.tasks_created,
                report.tasks_dispatched
            );
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.tick_count += 1;
            stats.last_report = Some(report.clone());
        }
        report
    }

    pub fn status(&self) -> SchedulerStatus {
        let (tick_count, last_report) = self
            .stats
            .lock()
            .map(|s| (s.tick_count, s.last_report.clone()))
            .unwrap_or_default();
        SchedulerStatus {
            running: self.is_running(),
            ticking: self.ticking.load(Ordering::SeqCst),
            interval_secs: self.interval.as_secs(),
            auto_dispatch: self.auto_dispatch,
            tick_count,
            last_report,
        }
    }
}

/// The synchronous part of a tick, moved onto the blocking pool.
struct EvaluationPass {
    db: Arc<DocketDb>,
    lifecycle: Arc<LifecycleService>,
    costs: Arc<dyn CostStore>,
    rules: RuleEngine,
}

impl EvaluationPass {
    fn run(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        match self.lifecycle.recalculate_all() {
            Ok(sweep) => {
                report.nodes_updated = sweep.updated;
                report.cases_closed = sweep.cases_closed.len();
            }
            Err(e) => {
                tracing::warn!("⚠️ Status sweep failed: {e}");
                report.errors += 1;
            }
        }

        let rules = self.db.enabled_rules().unwrap_or_else(|e| {
            tracing::warn!("⚠️ Loading rules failed: {e}");
            report.errors += 1;
            Vec::new()
        });
        report.rules_evaluated = rules.len();

        if !rules.is_empty() {
            let candidates = self.load_candidates(&rules, &mut report);
            for rule in &rules {
                let eval = self.rules.evaluate(rule, &candidates, now);
                report.tasks_created += eval.created.len();
                report.tasks_suppressed += eval.suppressed;
                report.errors += eval.failed;
            }
        }
        report
    }

    /// Candidates are loaded fresh every tick, only for rule types in use.
    fn load_candidates(&self, rules: &[NotificationRule], report: &mut TickReport) -> Vec<Candidate> {
        let wants = |t: RuleType| rules.iter().any(|r| r.rule_type == t);
        let mut candidates = Vec::new();

        if wants(RuleType::NodeDeadline) {
            match self.db.open_nodes_with_deadline() {
                Ok(nodes) => candidates.extend(nodes.into_iter().map(Candidate::Node)),
                Err(e) => {
                    tracing::warn!("⚠️ Loading node candidates failed: {e}");
                    report.errors += 1;
                }
            }
        }
        if wants(RuleType::CostDue) {
            match self.costs.unpaid_costs() {
                Ok(costs) => candidates.extend(costs.into_iter().map(Candidate::Cost)),
                Err(e) => {
                    tracing::warn!("⚠️ Loading cost candidates failed: {e}");
                    report.errors += 1;
                }
            }
        }
        candidates
    }
}
