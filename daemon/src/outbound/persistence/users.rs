//! Synchronizing the local `users` table with the tasking manager.
//!
//! One transaction per cycle: upsert every upstream user, then
//! optionally purge local rows that disappeared upstream. An error
//! anywhere rolls the whole cycle back.

use std::collections::HashSet;

use tracing::debug;

use crate::domain::{Error, TmUser};
use crate::outbound::persistence::Db;

const INSERT_USER: &str = "INSERT INTO users (id, username, name, date_registered, \
     last_validation_date, tasks_mapped, tasks_validated, tasks_invalidated, \
     projects_mapped, mapping_level, gender, role) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)";

const UPDATE_USER: &str = "UPDATE users SET username = $2, name = $3, date_registered = $4, \
     last_validation_date = $5, tasks_mapped = $6, tasks_validated = $7, \
     tasks_invalidated = $8, projects_mapped = $9, mapping_level = $10, \
     gender = $11, role = $12 WHERE id = $1";

/// Counters of one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// Upsert `users` by id and, when `purge` is set, delete local rows no
/// longer present upstream.
///
/// # Errors
///
/// Returns a database error when any statement or the commit fails;
/// nothing is applied in that case.
pub async fn sync_users(db: &Db, users: &[TmUser], purge: bool) -> Result<SyncOutcome, Error> {
    let mut client = db.client().await?;
    let transaction = client
        .transaction()
        .await
        .map_err(|err| Error::database(format!("cannot open sync transaction: {err}")))?;

    let current: HashSet<i64> = transaction
        .query("SELECT id FROM users", &[])
        .await
        .map_err(|err| Error::database(format!("cannot list users: {err}")))?
        .iter()
        .map(|row| row.get::<_, i64>(0))
        .collect();
    debug!(count = current.len(), "local users before sync");

    let insert = transaction
        .prepare(INSERT_USER)
        .await
        .map_err(|err| Error::database(format!("cannot prepare insert: {err}")))?;
    let update = transaction
        .prepare(UPDATE_USER)
        .await
        .map_err(|err| Error::database(format!("cannot prepare update: {err}")))?;

    let mut outcome = SyncOutcome::default();
    let mut seen: HashSet<i64> = HashSet::with_capacity(users.len());
    for user in users {
        seen.insert(user.id);
        let statement = if current.contains(&user.id) {
            &update
        } else {
            &insert
        };
        let projects: Vec<i64> = user.projects_mapped.clone();
        let affected = transaction
            .execute(statement, &[
                &user.id,
                &user.username,
                &user.name,
                &user.date_registered,
                &user.last_validation_date,
                &user.tasks_mapped,
                &user.tasks_validated,
                &user.tasks_invalidated,
                &projects,
                &user.mapping_level,
                &user.gender,
                &user.role,
            ])
            .await
            .map_err(|err| Error::database(format!("cannot sync user {}: {err}", user.id)))?;
        if affected == 1 {
            if current.contains(&user.id) {
                outcome.updated += 1;
            } else {
                outcome.created += 1;
            }
        }
    }

    if purge {
        let stale: Vec<i64> = current.difference(&seen).copied().collect();
        if !stale.is_empty() {
            outcome.deleted = transaction
                .execute("DELETE FROM users WHERE id = ANY($1)", &[&stale])
                .await
                .map_err(|err| Error::database(format!("cannot purge users: {err}")))?;
        }
    }

    transaction
        .commit()
        .await
        .map_err(|err| Error::database(format!("user sync commit failed: {err}")))?;
    Ok(outcome)
}
