//! Tasking-manager user directory over its PostgreSQL database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::NoTls;
use tracing::{debug, error};

use crate::domain::{Error, TmUser, UserDirectory};

const USERS_QUERY: &str = "SELECT id, username, name, date_registered, last_validation_date, \
     tasks_mapped, tasks_validated, tasks_invalidated, projects_mapped, \
     mapping_level, gender, role FROM users";

/// Pulls users straight from the tasking-manager database. A fresh
/// connection per cycle keeps this independent of the daemon's pool.
#[derive(Debug, Clone)]
pub struct TaskingManagerDirectory {
    url: String,
}

impl TaskingManagerDirectory {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl UserDirectory for TaskingManagerDirectory {
    async fn fetch_users(&self) -> Result<Vec<TmUser>, Error> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
            .await
            .map_err(|err| {
                Error::database(format!("cannot connect to tasking manager: {err}"))
            })?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "tasking-manager connection closed");
            }
        });

        let rows = client
            .query(USERS_QUERY, &[])
            .await
            .map_err(|err| Error::database(format!("tasking-manager query failed: {err}")))?;
        debug!(count = rows.len(), "fetched tasking-manager users");

        Ok(rows
            .iter()
            .map(|row| TmUser {
                id: row.get::<_, i64>(0),
                username: row.get::<_, Option<String>>(1).unwrap_or_default(),
                name: row.get::<_, Option<String>>(2).unwrap_or_default(),
                date_registered: row.get::<_, Option<DateTime<Utc>>>(3),
                last_validation_date: row.get::<_, Option<DateTime<Utc>>>(4),
                tasks_mapped: row.get::<_, Option<i32>>(5).unwrap_or_default(),
                tasks_validated: row.get::<_, Option<i32>>(6).unwrap_or_default(),
                tasks_invalidated: row.get::<_, Option<i32>>(7).unwrap_or_default(),
                projects_mapped: row
                    .get::<_, Option<Vec<i64>>>(8)
                    .unwrap_or_default(),
                mapping_level: row.get::<_, Option<i32>>(9).unwrap_or_default(),
                gender: row.get::<_, Option<i32>>(10).unwrap_or_default(),
                role: row.get::<_, Option<i32>>(11).unwrap_or_default(),
            })
            .collect())
    }
}
