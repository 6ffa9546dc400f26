//! Status snapshot handed to UI/CLI collaborators.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task::{Task, TaskStatus};

/// Point-in-time view of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    /// Current execution state.
    pub status: TaskStatus,
    /// Whether the task can be selected as ready.
    pub enabled: bool,
    /// Start of the most recent attempt.
    pub last_run: Option<DateTime<Utc>>,
    /// Earliest time of the next attempt.
    pub next_run: Option<DateTime<Utc>>,
    /// Consecutive failures since the last success.
    pub error_count: u32,
}

impl TaskReport {
    pub(crate) fn of(task: &Task) -> Self {
        Self {
            status: task.status(),
            enabled: task.enabled(),
            last_run: task.last_run(),
            next_run: Some(task.next_run()),
            error_count: task.error_count(),
        }
    }
}

/// Point-in-time view of the whole scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Whether the polling loop is active.
    pub running: bool,
    /// Number of registered tasks.
    pub total_tasks: usize,
    /// Number of enabled tasks.
    pub enabled_tasks: usize,
    /// Number of tasks currently executing.
    pub running_tasks: usize,
    /// Number of tasks whose last attempt failed.
    pub failed_tasks: usize,
    /// Per-task details, keyed by task name.
    pub tasks: BTreeMap<String, TaskReport>,
}

impl SchedulerStatus {
    pub(crate) fn of<'a>(running: bool, tasks: impl Iterator<Item = &'a Task>) -> Self {
        let mut report = Self {
            running,
            total_tasks: 0,
            enabled_tasks: 0,
            running_tasks: 0,
            failed_tasks: 0,
            tasks: BTreeMap::new(),
        };

        for task in tasks {
            report.total_tasks += 1;
            if task.enabled() {
                report.enabled_tasks += 1;
            }
            match task.status() {
                TaskStatus::Running => report.running_tasks += 1,
                TaskStatus::Failed => report.failed_tasks += 1,
                _ => {}
            }
            report
                .tasks
                .insert(task.name().to_string(), TaskReport::of(task));
        }

        report
    }
}
