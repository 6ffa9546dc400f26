//! Cooperative, market-aware task scheduling for trading hosts.
//!
//! Three pieces:
//!
//! - [`calendar`] — a pure [`TradingCalendar`] oracle answering "is this a
//!   trading day", "is this market open", "when should this task run".
//! - [`task`] — the [`Task`] entity: an opaque [`Runnable`] action plus
//!   interval, priority, dependencies, error budget and run state.
//! - [`scheduler`] — the [`TaskScheduler`] polling loop that owns the
//!   registry, runs the per-tick ready set concurrently and applies
//!   success, retry-with-backoff and park transitions.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tradeloop_core::{Task, TaskScheduler, TradingCalendar, async_action};
//!
//! # async fn demo() {
//! let scheduler = Arc::new(TaskScheduler::new(TradingCalendar::default()));
//! scheduler
//!     .add(
//!         Task::builder(
//!             "news_fetch",
//!             async_action(|| async { Ok(()) }),
//!             Duration::from_secs(60),
//!         )
//!         .priority(5)
//!         .build(),
//!     )
//!     .expect("empty registry");
//! scheduler.start();
//! # scheduler.stop().await;
//! # }
//! ```

pub mod calendar;
pub mod runnable;
pub mod scheduler;
pub mod task;

pub use calendar::{CalendarBuilder, Market, TradingCalendar, TradingSession};
pub use runnable::{AsyncAction, BlockingAction, Runnable, TaskError, async_action, blocking_action};
pub use scheduler::{SchedulerError, SchedulerStatus, TaskReport, TaskScheduler};
pub use task::{FailureOutcome, Task, TaskBuilder, TaskStatus, TransitionError};
