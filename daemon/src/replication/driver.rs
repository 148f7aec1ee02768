//! The replicator driver: rounds of worker tasks over the cursor.
//!
//! Each round spawns N workers on consecutive cursor positions, awaits
//! them all, merges their SQL in submission order and commits it as one
//! transaction. The cursor only keeps its advancement when the round
//! commits; any hard failure re-attempts the same range next round.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::{Error, RoundSink};
use crate::replication::remote::parse_triple_path;
use crate::replication::{
    ChangeWorker, ChangesetWorker, RemoteUrl, TaskOutcome, TaskStatus, closest_to,
};

/// A file this close to wall-clock now means the driver has caught up.
pub const CAUGHT_UP_WINDOW_MINUTES: i64 = 2;

/// Inter-task delay once caught up: publication is roughly minutely, so
/// polling faster than this only burns the mirrors' goodwill.
pub const CAUGHT_UP_DELAY: Duration = Duration::from_secs(45);

/// Wall-clock source, injectable so round behaviour is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Driver knobs shared by both replication kinds.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Worker tasks per round while catching up.
    pub concurrency: usize,
    /// Stop once a file's latest timestamp reaches this.
    pub end_time: Option<DateTime<Utc>>,
}

/// Monitor the changeset namespace until `end_time` or cancellation.
///
/// # Errors
///
/// Returns an error only for unrecoverable driver-level failures;
/// transient trouble is retried in place.
pub async fn monitor_changesets(
    remote: RemoteUrl,
    worker: ChangesetWorker,
    sink: Arc<dyn RoundSink>,
    settings: DriverSettings,
    clock: Arc<dyn Clock>,
    active: watch::Receiver<bool>,
) -> Result<(), Error> {
    let mirrors = worker.mirrors.len();
    run_rounds(
        remote,
        mirrors,
        sink,
        settings,
        clock,
        active,
        move |remote, mirror_index| {
            let worker = worker.clone();
            async move { worker.process(remote, mirror_index).await }
        },
    )
    .await
}

/// Monitor an osmChange namespace until `end_time` or cancellation.
///
/// # Errors
///
/// Returns an error only for unrecoverable driver-level failures;
/// transient trouble is retried in place.
pub async fn monitor_changes(
    remote: RemoteUrl,
    worker: ChangeWorker,
    sink: Arc<dyn RoundSink>,
    settings: DriverSettings,
    clock: Arc<dyn Clock>,
    active: watch::Receiver<bool>,
) -> Result<(), Error> {
    let mirrors = worker.mirrors.len();
    run_rounds(
        remote,
        mirrors,
        sink,
        settings,
        clock,
        active,
        move |remote, mirror_index| {
            let worker = worker.clone();
            async move { worker.process(remote, mirror_index).await }
        },
    )
    .await
}

/// The round engine shared by both drivers.
#[expect(
    clippy::too_many_lines,
    reason = "the round loop reads best as one unit"
)]
pub async fn run_rounds<F, Fut>(
    mut remote: RemoteUrl,
    mirror_count: usize,
    sink: Arc<dyn RoundSink>,
    settings: DriverSettings,
    clock: Arc<dyn Clock>,
    active: watch::Receiver<bool>,
    spawn_task: F,
) -> Result<(), Error>
where
    F: Fn(RemoteUrl, usize) -> Fut,
    Fut: Future<Output = TaskOutcome> + Send + 'static,
{
    let period = remote.frequency.period();
    let mut mirror_cursor = 0_usize;
    let mut concurrency = settings.concurrency.max(1);
    let mut delay = Duration::ZERO;
    let mut caught_up = false;

    loop {
        if !*active.borrow() {
            info!(frequency = %remote.frequency, "driver cancelled, draining");
            return Ok(());
        }

        // Snapshot so a failed round re-attempts the same cursor range.
        let snapshot = remote.clone();
        let mut handles = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            handles.push(tokio::spawn(spawn_task(remote.clone(), mirror_cursor)));
            if mirror_count > 0 {
                mirror_cursor = (mirror_cursor + 1) % mirror_count;
            }
            remote.increment();
        }

        // Await in submission order; the merge order is part of the
        // round contract.
        let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(concurrency);
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => {
                    error!(error = %join_error, "worker task aborted");
                    outcomes.push(TaskOutcome::new(String::new()));
                }
            }
        }

        let hard_failure = outcomes.iter().any(|task| {
            matches!(task.status, TaskStatus::ParseError | TaskStatus::IoError)
        });
        let all_missing = outcomes
            .iter()
            .all(|task| task.status == TaskStatus::RemoteNotFound);
        let any_missing = outcomes
            .iter()
            .any(|task| task.status == TaskStatus::RemoteNotFound);

        let mut committed = false;
        if hard_failure {
            warn!(
                frequency = %remote.frequency,
                "round failed, nothing committed and cursor unchanged"
            );
            remote = snapshot.clone();
        } else if all_missing {
            // Either the cursor ran past the newest published file or
            // the whole range is a hole; treat it as the head and wait.
            remote = snapshot.clone();
            info!(
                frequency = %remote.frequency,
                path = %remote.triple_path(),
                "no published file at cursor, waiting"
            );
            tokio::time::sleep(period.min(Duration::from_secs(60))).await;
        } else {
            let merged: String = outcomes
                .iter()
                .map(|task| task.sql.as_str())
                .collect::<String>();
            if merged.is_empty() {
                committed = true;
            } else {
                match sink.apply_round(&merged).await {
                    Ok(()) => committed = true,
                    Err(err) => {
                        error!(error = %err, "round commit failed, rolling back cursor");
                        remote = snapshot.clone();
                    }
                }
            }
            if committed && caught_up && any_missing {
                // The next file likely does not exist yet; wait rather
                // than advance past it.
                remote = snapshot.clone();
            }
        }

        let now = clock.now();
        if let Some(closest) = closest_to(&outcomes, now) {
            if committed
                && let (Some(timestamp), Some(end_time)) = (closest.timestamp, settings.end_time)
                && timestamp >= end_time
            {
                info!(path = %closest.path, "end time reached, stopping driver");
                return Ok(());
            }
            if committed
                && !caught_up
                && let Some(timestamp) = closest.timestamp
                && now - timestamp <= chrono::Duration::minutes(CAUGHT_UP_WINDOW_MINUTES)
            {
                caught_up = true;
                concurrency = 1;
                delay = CAUGHT_UP_DELAY;
                if let Ok((major, minor, index)) = parse_triple_path(&closest.path) {
                    remote.update_path(major, minor, index);
                    remote.increment();
                }
                info!(path = %closest.path, "caught up with now");
            }
        }

        if hard_failure {
            // Do not spin on a flapping mirror or a corrupt artifact.
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}
