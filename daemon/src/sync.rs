//! Periodic tasking-manager user synchronization.
//!
//! Runs on its own cadence, independent of the replication drivers, and
//! shares only the database handle. A failing cycle is logged and the
//! next one starts fresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info};

use crate::domain::UserDirectory;
use crate::outbound::persistence::users::sync_users;
use crate::outbound::persistence::Db;

/// Pull users from the directory and upsert them locally until the
/// active flag clears. A zero cadence runs a single cycle.
pub async fn run_user_sync(
    directory: Arc<dyn UserDirectory>,
    db: Db,
    cadence: Duration,
    mut active: watch::Receiver<bool>,
) {
    loop {
        if !*active.borrow() {
            return;
        }
        let started = Instant::now();
        match directory.fetch_users().await {
            Ok(users) => match sync_users(&db, &users, true).await {
                Ok(outcome) => info!(
                    created = outcome.created,
                    updated = outcome.updated,
                    deleted = outcome.deleted,
                    elapsed_secs = started.elapsed().as_secs(),
                    "user sync complete"
                ),
                Err(err) => error!(error = %err, "user sync failed, will retry next cycle"),
            },
            Err(err) => error!(error = %err, "cannot fetch tasking-manager users"),
        }

        if cadence.is_zero() {
            return;
        }
        let wait = cadence.saturating_sub(started.elapsed());
        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            _ = active.changed() => {}
        }
    }
}
