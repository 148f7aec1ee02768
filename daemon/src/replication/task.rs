//! The outcome of one worker invocation.

use chrono::{DateTime, Utc};

/// How a worker's fetch-and-process attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    /// The artifact is absent on every mirror tried.
    RemoteNotFound,
    /// Gunzip or XML decoding failed; fatal for the round.
    ParseError,
    /// Transport failed after mirror rotation was exhausted.
    IoError,
}

/// One worker's result, aggregated per round by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    /// The `MMM/NNN/III` fragment this task processed.
    pub path: String,
    /// The latest timestamp embedded in the processed file.
    pub timestamp: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// SQL accumulated by this task, merged by the driver in
    /// submission order.
    pub sql: String,
}

impl TaskOutcome {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            timestamp: None,
            status: TaskStatus::IoError,
            sql: String::new(),
        }
    }
}

/// The task whose timestamp lies nearest to `now`.
///
/// Tasks without a timestamp (failed downloads) cannot win.
#[must_use]
pub fn closest_to(tasks: &[TaskOutcome], now: DateTime<Utc>) -> Option<&TaskOutcome> {
    tasks
        .iter()
        .filter_map(|task| {
            task.timestamp
                .map(|ts| ((now - ts).num_seconds().abs(), task))
        })
        .min_by_key(|(delta, _)| *delta)
        .map(|(_, task)| task)
}
