//! Task entity and its execution state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::calendar::Market;
use crate::runnable::{Runnable, TaskError};
use crate::scheduler::backoff::compute_backoff;

/// Execution state of a task.
///
/// `Cancelled` is reserved for hosts that wrap task bodies with external
/// cancellation; the scheduler loop itself never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Never executed yet, or waiting for its next run.
    Pending,
    /// An execution attempt is in flight.
    Running,
    /// The last attempt succeeded.
    Completed,
    /// The last attempt failed.
    Failed,
    /// A pending run was cancelled externally.
    Cancelled,
}

/// Attempted state transition not permitted by the state machine.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The requested move is not in the transition table.
    #[error("illegal task transition from {from} to {to}")]
    Illegal {
        /// State the task was in.
        from: &'static str,
        /// State that was requested.
        to: &'static str,
    },
}

impl TaskStatus {
    /// Lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the task may be picked up for a run from this state.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    /// `Pending`/`Completed`/`Failed` -> `Running`.
    pub fn mark_as_running(self) -> Result<TaskStatus, TransitionError> {
        if self.can_start() {
            Ok(TaskStatus::Running)
        } else {
            Err(TransitionError::Illegal {
                from: self.as_str(),
                to: "running",
            })
        }
    }

    /// `Running` -> `Completed`.
    pub fn mark_as_completed(self) -> Result<TaskStatus, TransitionError> {
        match self {
            TaskStatus::Running => Ok(TaskStatus::Completed),
            status => Err(TransitionError::Illegal {
                from: status.as_str(),
                to: "completed",
            }),
        }
    }

    /// `Running` -> `Failed`.
    pub fn mark_as_failed(self) -> Result<TaskStatus, TransitionError> {
        match self {
            TaskStatus::Running => Ok(TaskStatus::Failed),
            status => Err(TransitionError::Illegal {
                from: status.as_str(),
                to: "failed",
            }),
        }
    }

    /// `Pending` -> `Cancelled`.
    pub fn mark_as_cancelled(self) -> Result<TaskStatus, TransitionError> {
        match self {
            TaskStatus::Pending => Ok(TaskStatus::Cancelled),
            status => Err(TransitionError::Illegal {
                from: status.as_str(),
                to: "cancelled",
            }),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the scheduler does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Task was disabled; operator intervention required to resume.
    Parked,
    /// A retry was scheduled after the given backoff delay.
    Retry(Duration),
}

/// One schedulable unit of work: its action, cadence, priority,
/// dependency set and error budget, plus mutable run state.
///
/// Tasks are built via [`Task::builder`] and registered with a
/// [`TaskScheduler`]; from then on the run state is owned by the loop.
///
/// [`TaskScheduler`]: crate::scheduler::TaskScheduler
pub struct Task {
    name: String,
    action: Arc<dyn Runnable>,
    interval: Duration,
    priority: i32,
    dependencies: Vec<String>,
    max_errors: u32,
    enabled: bool,
    timeout: Option<Duration>,
    market: Option<Market>,
    calendar_gated: bool,

    status: TaskStatus,
    last_run: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
    // Monotonic twin of `next_run`; the loop's due-ness checks use this so
    // they are immune to wall-clock steps and drivable by tokio's test
    // clock.
    due_at: Instant,
    error_count: u32,
    pub(crate) seq: u64,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("status", &self.status)
            .field("enabled", &self.enabled)
            .field("error_count", &self.error_count)
            .field("next_run", &self.next_run)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Starts building a task. `interval` is the minimum wall-clock gap
    /// between successive runs; the first run happens one interval after
    /// registration.
    pub fn builder(
        name: impl Into<String>,
        action: Arc<dyn Runnable>,
        interval: Duration,
    ) -> TaskBuilder {
        TaskBuilder {
            name: name.into(),
            action,
            interval,
            priority: 0,
            dependencies: Vec::new(),
            max_errors: 3,
            enabled: true,
            timeout: None,
            market: None,
            calendar_gated: false,
        }
    }

    /// Unique task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum gap between successive runs.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Higher priority runs first when several tasks are ready at once.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Names of tasks that must be `Completed` for this one to be ready.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Consecutive-failure budget before auto-disable.
    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    /// Disabled tasks are never selected as ready.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Per-attempt deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Market used for calendar gating, if any.
    pub fn market(&self) -> Option<Market> {
        self.market
    }

    /// Whether the loop consults the trading calendar before running this
    /// task.
    pub fn calendar_gated(&self) -> bool {
        self.calendar_gated
    }

    /// Current execution state.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Start of the most recent attempt, if any.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// Earliest wall-clock time of the next attempt.
    pub fn next_run(&self) -> DateTime<Utc> {
        self.next_run
    }

    /// Consecutive failures since the last success.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub(crate) fn action(&self) -> Arc<dyn Runnable> {
        Arc::clone(&self.action)
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.due_at <= now
    }

    /// Marks the task `Running` and records the attempt start.
    ///
    /// Driven by the scheduler loop; exposed for hosts running tasks
    /// out-of-band.
    pub fn begin_run(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = self.status.mark_as_running()?;
        self.last_run = Some(now);
        Ok(())
    }

    /// Records a successful attempt: resets the error streak and schedules
    /// the next run one interval out.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = self.status.mark_as_completed()?;
        self.error_count = 0;
        self.next_run = now + self.interval;
        self.due_at = Instant::now() + self.interval;
        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// Fatal errors and an exhausted error budget park the task
    /// (`enabled = false`, no automatic recovery); otherwise a retry is
    /// scheduled with capped exponential backoff.
    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        error: &TaskError,
    ) -> Result<FailureOutcome, TransitionError> {
        self.status = self.status.mark_as_failed()?;
        self.error_count += 1;

        if error.is_fatal() || self.error_count >= self.max_errors {
            self.enabled = false;
            return Ok(FailureOutcome::Parked);
        }

        let delay = compute_backoff(self.interval, self.error_count);
        self.next_run = now + delay;
        self.due_at = Instant::now() + delay;
        Ok(FailureOutcome::Retry(delay))
    }

    /// Cancels a pending run. Reserved for hosts wrapping task bodies with
    /// external cancellation.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.status = self.status.mark_as_cancelled()?;
        Ok(())
    }
}

/// Builder for [`Task`]; defaults match the registration contract
/// (`priority = 0`, no dependencies, `max_errors = 3`, enabled).
pub struct TaskBuilder {
    name: String,
    action: Arc<dyn Runnable>,
    interval: Duration,
    priority: i32,
    dependencies: Vec<String>,
    max_errors: u32,
    enabled: bool,
    timeout: Option<Duration>,
    market: Option<Market>,
    calendar_gated: bool,
}

impl fmt::Debug for TaskBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl TaskBuilder {
    /// Selection priority; higher runs first within a tick.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Tasks that must have completed before this one becomes ready.
    pub fn dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = names.into_iter().map(Into::into).collect();
        self
    }

    /// Consecutive-failure budget before the task is auto-disabled.
    pub fn max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Registers the task disabled (or enabled, the default).
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Per-attempt deadline; an expired attempt counts as a retryable
    /// failure.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Market consulted when the task is calendar-gated.
    pub fn market(mut self, market: Market) -> Self {
        self.market = Some(market);
        self
    }

    /// Makes the loop ask the trading calendar before each run.
    pub fn calendar_gated(mut self, gated: bool) -> Self {
        self.calendar_gated = gated;
        self
    }

    /// Finalizes the task with `Pending` state and its first run one
    /// interval from now.
    pub fn build(self) -> Task {
        Task {
            name: self.name,
            action: self.action,
            interval: self.interval,
            priority: self.priority,
            dependencies: self.dependencies,
            max_errors: self.max_errors,
            enabled: self.enabled,
            timeout: self.timeout,
            market: self.market,
            calendar_gated: self.calendar_gated,
            status: TaskStatus::Pending,
            last_run: None,
            next_run: Utc::now() + self.interval,
            due_at: Instant::now() + self.interval,
            error_count: 0,
            seq: 0,
        }
    }
}
