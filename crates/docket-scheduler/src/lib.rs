//! # Docket Scheduler
//!
//! Process-node lifecycle and deadline reminders for legal case management.
//!
//! ## Design Principles
//! - One status decision table backs both single-node and bulk SQL recomputation
//! - SQLite persistence: all state in the store, restart resumes with no replay
//! - Tokio timers only: one non-reentrant tick per interval
//! - Weak task references resolved at dispatch, orphans reported then purgeable
//!
//! ## Architecture
//! ```text
//! Scheduler (tokio interval, non-reentrant tick)
//!   ├── LifecycleService.recalculate_all
//!   │     ├── bulk UPDATE … SET status = CASE … (generated from the decision table)
//!   │     └── cascading closure: all nodes completed → case closed + CASE_STATUS_CHANGE log
//!   ├── RuleEngine.evaluate (enabled rules × fresh candidates)
//!   │     └── trigger window → dedup by frequency → NotificationTask
//!   └── TaskQueue.dispatch_due → Dispatcher
//!                                  ├── In-app
//!                                  ├── Webhook (HTTP POST)
//!                                  ├── Telegram (sendMessage)
//!                                  └── E-mail (SMTP)
//! ```

pub mod clock;
pub mod dispatch;
pub mod engine;
pub mod lifecycle;
pub mod nodes;
pub mod notify;
pub mod persistence;
pub mod queue;
pub mod rules;
pub mod status;
pub mod store;
pub mod tasks;

pub use clock::{Clock, fixed_clock, system_clock};
pub use dispatch::{Dispatcher, NotifyTarget};
pub use engine::{Scheduler, SchedulerStatus, TickReport};
pub use lifecycle::{LifecycleService, NodeDetail, OverdueStatistics, SweepReport, UpcomingNodes};
pub use nodes::{NewNode, NodeUpdate, ProcessNode};
pub use notify::Recipient;
pub use persistence::DocketDb;
pub use queue::{DeliveryOutcome, DispatchReport, TaskQueue};
pub use rules::{NotificationRule, RuleEngine, RuleInput};
pub use status::{NodeStatus, OverdueInfo, calculate_status, check_overdue};
pub use store::{CaseLogStore, CaseStore, CostStore, EntityLookup};
pub use tasks::{NewTask, NotificationTask, RelatedRef, SendHistory, TaskFilter, TaskStatus};
