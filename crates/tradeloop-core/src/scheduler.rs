//! The polling scheduler loop and its task registry.
//!
//! [`TaskScheduler`] owns a registry of named [`Task`]s and, once started,
//! polls it at a fixed cadence (1 second by default). Each tick selects
//! the ready set: enabled tasks that are due, not already running, whose
//! dependencies have all completed, and whose calendar gate (when opted
//! in) permits execution. Ready tasks run concurrently; one body's
//! failure or panic never affects its siblings or the loop.
//!
//! The registry is the only shared mutable state. All mutation happens
//! under a single mutex that is never held across an await, so external
//! calls (`add`, `remove`, `enable`, `disable`, `status`) are safe at any
//! time, including mid-tick.

pub(crate) mod backoff;
mod report;

pub use report::{SchedulerStatus, TaskReport};

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::calendar::TradingCalendar;
use crate::runnable::{Runnable, TaskError};
use crate::task::{FailureOutcome, Task, TaskStatus};

/// Default polling cadence.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a panic in the loop's own bookkeeping before resuming.
const BOOKKEEPING_COOLDOWN: Duration = Duration::from_secs(5);

/// Registration-time configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// A task with this name is already registered.
    #[error("task '{0}' already exists")]
    DuplicateTask(String),
    /// A dependency names a task that is not registered, which would be
    /// permanently unsatisfiable.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// Task being registered.
        task: String,
        /// The missing dependency name.
        dependency: String,
    },
}

/// Priority- and dependency-aware cooperative task scheduler.
///
/// Construct one per host application and share it by `Arc`; there is no
/// global instance.
pub struct TaskScheduler {
    calendar: Arc<TradingCalendar>,
    poll_interval: Duration,
    tasks: Mutex<HashMap<String, Task>>,
    next_seq: AtomicU64,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// A task selected for execution in the current tick. Holds everything
/// needed to run it without touching the registry.
struct ReadyTask {
    name: String,
    action: Arc<dyn Runnable>,
    timeout: Option<Duration>,
}

impl TaskScheduler {
    /// Creates a scheduler with the default 1-second polling cadence.
    pub fn new(calendar: TradingCalendar) -> Self {
        Self::with_poll_interval(calendar, DEFAULT_POLL_INTERVAL)
    }

    /// Creates a scheduler with a custom polling cadence. Mainly for
    /// hosts with unusual latency needs and for tests.
    pub fn with_poll_interval(calendar: TradingCalendar, poll_interval: Duration) -> Self {
        Self {
            calendar: Arc::new(calendar),
            poll_interval,
            tasks: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
            loop_handle: Mutex::new(None),
        }
    }

    /// The calendar this scheduler consults for gated tasks.
    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a task.
    ///
    /// Rejects duplicate names and dependencies on names not yet
    /// registered; an unknown dependency could never be satisfied.
    pub fn add(&self, mut task: Task) -> Result<(), SchedulerError> {
        let mut tasks = self.lock_tasks();

        if tasks.contains_key(task.name()) {
            return Err(SchedulerError::DuplicateTask(task.name().to_string()));
        }
        for dependency in task.dependencies() {
            if !tasks.contains_key(dependency) {
                return Err(SchedulerError::UnknownDependency {
                    task: task.name().to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        task.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        info!(
            task = %task.name(),
            interval_ms = task.interval().as_millis(),
            priority = task.priority(),
            "task added"
        );
        tasks.insert(task.name().to_string(), task);
        Ok(())
    }

    /// Removes a task. Unknown names are a warning, not an error.
    pub fn remove(&self, name: &str) {
        if self.lock_tasks().remove(name).is_some() {
            info!(task = %name, "task removed");
        } else {
            warn!(task = %name, "task not found");
        }
    }

    /// Re-enables a task, e.g. after it exhausted its error budget.
    pub fn enable(&self, name: &str) {
        self.set_enabled(name, true);
    }

    /// Disables a task without removing it.
    pub fn disable(&self, name: &str) {
        self.set_enabled(name, false);
    }

    fn set_enabled(&self, name: &str, enabled: bool) {
        match self.lock_tasks().get_mut(name) {
            Some(task) => {
                task.set_enabled(enabled);
                info!(task = %name, enabled, "task toggled");
            }
            None => warn!(task = %name, "task not found"),
        }
    }

    /// Current status of a single task.
    pub fn task_status(&self, name: &str) -> Option<TaskStatus> {
        self.lock_tasks().get(name).map(Task::status)
    }

    /// Next scheduled run time of a single task.
    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.lock_tasks().get(name).map(Task::next_run)
    }

    /// Snapshot of every task plus aggregate counts. Safe to call at any
    /// time, including while a tick is executing.
    pub fn status(&self) -> SchedulerStatus {
        let tasks = self.lock_tasks();
        SchedulerStatus::of(self.running.load(Ordering::SeqCst), tasks.values())
    }

    /// Starts the polling loop on the current tokio runtime. A second
    /// call while running is a warning-level no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler is already running");
            return;
        }

        let token = CancellationToken::new();
        *self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_loop(token).await });
        *self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!("scheduler started");
    }

    /// Signals the loop to exit after the current tick and waits for it.
    /// In-flight executions from the final tick finish naturally. A call
    /// while not running is a warning-level no-op.
    pub async fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            warn!("scheduler is not running");
            return;
        }

        info!("stopping scheduler");
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();

        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        info!("scheduler stopped");
    }

    async fn run_loop(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(poll_ms = self.poll_interval.as_millis(), "scheduler loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // A panic here is a bug in the scheduler itself, not in
                    // a task body; log it and resume after a cooldown
                    // rather than killing the loop.
                    if AssertUnwindSafe(self.tick()).catch_unwind().await.is_err() {
                        error!("scheduler bookkeeping panicked, cooling down");
                        tokio::time::sleep(BOOKKEEPING_COOLDOWN).await;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("scheduler loop exited");
    }

    /// One polling tick: select the ready set, run it concurrently, apply
    /// the outcomes. The tick does not return until every execution it
    /// started has been accounted for.
    async fn tick(&self) {
        let ready = self.collect_ready();
        if ready.is_empty() {
            return;
        }

        debug!(count = ready.len(), "executing ready tasks");
        // Futures are created and first polled in priority order.
        join_all(ready.into_iter().map(|entry| self.execute(entry))).await;
    }

    fn collect_ready(&self) -> Vec<ReadyTask> {
        let now_mono = Instant::now();
        let now_wall = Utc::now();
        let mut tasks = self.lock_tasks();

        // Dependency checks run against this tick's view of completed
        // tasks, so a dependency re-triggered mid-tick cannot flicker a
        // dependent in and out of readiness.
        let completed: HashSet<String> = tasks
            .values()
            .filter(|t| t.status() == TaskStatus::Completed)
            .map(|t| t.name().to_string())
            .collect();

        let mut ready: Vec<&mut Task> = tasks
            .values_mut()
            .filter(|t| {
                t.enabled()
                    && t.status().can_start()
                    && t.is_due(now_mono)
                    && t.dependencies().iter().all(|d| completed.contains(d))
            })
            .collect();

        ready.retain(|t| {
            !t.calendar_gated()
                || self.calendar.should_run_task(t.name(), t.market(), now_wall)
        });

        ready.sort_by(|a, b| b.priority().cmp(&a.priority()).then(a.seq.cmp(&b.seq)));

        ready
            .into_iter()
            .filter_map(|task| match task.begin_run(now_wall) {
                Ok(()) => {
                    debug!(task = %task.name(), "task selected");
                    Some(ReadyTask {
                        name: task.name().to_string(),
                        action: task.action(),
                        timeout: task.timeout(),
                    })
                }
                Err(err) => {
                    error!(task = %task.name(), %err, "ready task refused transition");
                    None
                }
            })
            .collect()
    }

    async fn execute(&self, entry: ReadyTask) {
        let ReadyTask {
            name,
            action,
            timeout,
        } = entry;

        let attempt = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, action.run()).await {
                    Ok(result) => result,
                    Err(_) => Err(TaskError::retryable(format!(
                        "attempt exceeded deadline of {limit:?}"
                    ))),
                },
                None => action.run().await,
            }
        };

        let result = match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(TaskError::retryable("task body panicked")),
        };

        self.finish(&name, result);
    }

    fn finish(&self, name: &str, result: Result<(), TaskError>) {
        let now = Utc::now();
        let mut tasks = self.lock_tasks();
        let Some(task) = tasks.get_mut(name) else {
            warn!(task = %name, "task removed while running");
            return;
        };

        let transition = match &result {
            Ok(()) => {
                info!(task = %name, "task completed");
                task.complete(now).map(|_| ())
            }
            Err(err) => task.fail(now, err).map(|outcome| match outcome {
                FailureOutcome::Retry(delay) => {
                    warn!(
                        task = %name,
                        %err,
                        error_count = task.error_count(),
                        delay_ms = delay.as_millis(),
                        "task failed, scheduling retry"
                    );
                }
                FailureOutcome::Parked => {
                    error!(
                        task = %name,
                        %err,
                        error_count = task.error_count(),
                        "task disabled after failure"
                    );
                }
            }),
        };

        if let Err(err) = transition {
            error!(task = %name, %err, "completion transition refused");
        }
    }
}
