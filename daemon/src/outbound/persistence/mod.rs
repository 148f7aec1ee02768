//! PostgreSQL adapters: the shared pool, the round transaction, the
//! state store, raw-object hydration and user synchronization.

pub mod raw_sql;
pub mod stats_sql;
pub mod users;
pub mod validation_sql;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use geo_types::Coord;
use tokio_postgres::NoTls;
use tracing::debug;

use crate::domain::{Error, NodeLocations, RawObjectLookup, RoundSink};
use crate::replication::{ReplicationFrequency, StateFile, StateStore};

/// Escape a string for inclusion in a single-quoted SQL literal.
#[must_use]
pub fn escape_literal(raw: &str) -> String {
    raw.replace('\'', "''")
}

fn db_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::database(format!("{context}: {err}"))
}

/// The shared database handle: a deadpool-managed pool of
/// tokio-postgres connections. Workers borrow read connections; the
/// driver borrows one connection per round for the transaction.
#[derive(Clone)]
pub struct Db {
    pool: Pool,
}

impl Db {
    /// Connect and verify the database is reachable. A failure here is
    /// fatal at startup.
    ///
    /// # Errors
    ///
    /// Returns a database error when the URL does not parse or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let config: tokio_postgres::Config = url
            .parse()
            .map_err(|err| db_error("bad database url", err))?;
        let manager = Manager::from_config(
            config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(16)
            .build()
            .map_err(|err| db_error("cannot build pool", err))?;
        let client = pool
            .get()
            .await
            .map_err(|err| db_error("cannot connect", err))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|err| db_error("connection check failed", err))?;
        debug!("database connection verified");
        Ok(Self { pool })
    }

    pub(crate) async fn client(&self) -> Result<deadpool_postgres::Object, Error> {
        self.pool
            .get()
            .await
            .map_err(|err| db_error("pool checkout failed", err))
    }
}

#[async_trait]
impl RoundSink for Db {
    async fn apply_round(&self, sql: &str) -> Result<(), Error> {
        let mut client = self.client().await?;
        let transaction = client
            .transaction()
            .await
            .map_err(|err| db_error("cannot open transaction", err))?;
        transaction
            .batch_execute(sql)
            .await
            .map_err(|err| db_error("round execution failed", err))?;
        transaction
            .commit()
            .await
            .map_err(|err| db_error("round commit failed", err))?;
        Ok(())
    }
}

fn state_from_row(row: &tokio_postgres::Row, frequency: ReplicationFrequency) -> StateFile {
    StateFile {
        timestamp: row.get::<_, Option<DateTime<Utc>>>(0),
        sequence: row.get::<_, i64>(1),
        path: row.get::<_, String>(2),
        frequency: Some(frequency),
    }
}

#[async_trait]
impl StateStore for Db {
    async fn last_state(
        &self,
        frequency: ReplicationFrequency,
    ) -> Result<Option<StateFile>, Error> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT timestamp, sequence, path FROM states \
                 WHERE frequency = $1 ORDER BY sequence DESC LIMIT 1",
                &[&frequency.as_path_str()],
            )
            .await
            .map_err(|err| db_error("last state lookup failed", err))?;
        Ok(rows.first().map(|row| state_from_row(row, frequency)))
    }

    async fn first_state_after(
        &self,
        frequency: ReplicationFrequency,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<StateFile>, Error> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT timestamp, sequence, path FROM states \
                 WHERE frequency = $1 AND timestamp >= $2 \
                 ORDER BY timestamp ASC LIMIT 1",
                &[&frequency.as_path_str(), &timestamp],
            )
            .await
            .map_err(|err| db_error("state-by-time lookup failed", err))?;
        Ok(rows.first().map(|row| state_from_row(row, frequency)))
    }

    async fn write_state(&self, state: &StateFile) -> Result<(), Error> {
        let Some(frequency) = state.frequency else {
            return Err(Error::database("cannot persist a state without frequency"));
        };
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO states (frequency, path, timestamp, sequence) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (frequency, path) DO UPDATE \
                 SET timestamp = $3, sequence = $4",
                &[
                    &frequency.as_path_str(),
                    &state.path,
                    &state.timestamp,
                    &state.sequence,
                ],
            )
            .await
            .map_err(|err| db_error("state write failed", err))?;
        Ok(())
    }
}

#[async_trait]
impl RawObjectLookup for Db {
    async fn nodes_by_ids(&self, ids: &[i64]) -> Result<NodeLocations, Error> {
        if ids.is_empty() {
            return Ok(NodeLocations::new());
        }
        let client = self.client().await?;
        let ids = ids.to_vec();
        let rows = client
            .query(
                "SELECT osm_id, ST_X(geom) AS lon, ST_Y(geom) AS lat \
                 FROM nodes WHERE osm_id = ANY($1)",
                &[&ids],
            )
            .await
            .map_err(|err| db_error("node hydration failed", err))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let lon: Option<f64> = row.get(1);
                let lat: Option<f64> = row.get(2);
                Some((row.get::<_, i64>(0), Coord { x: lon?, y: lat? }))
            })
            .collect())
    }

    async fn ways_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>, Error> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.client().await?;
        let ids = ids.to_vec();
        let rows = client
            .query(
                "SELECT osm_id, refs FROM ways WHERE osm_id = ANY($1)",
                &[&ids],
            )
            .await
            .map_err(|err| db_error("way hydration failed", err))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let refs: Option<Vec<i64>> = row.get(1);
                Some((row.get::<_, i64>(0), refs?))
            })
            .collect())
    }

    async fn ways_referencing(&self, node_ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>, Error> {
        if node_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.client().await?;
        let node_ids = node_ids.to_vec();
        let rows = client
            .query(
                "SELECT osm_id, refs FROM ways WHERE refs && $1::bigint[]",
                &[&node_ids],
            )
            .await
            .map_err(|err| db_error("affected-way lookup failed", err))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let refs: Option<Vec<i64>> = row.get(1);
                Some((row.get::<_, i64>(0), refs?))
            })
            .collect())
    }

    async fn validated_ids(&self, ids: &[i64]) -> Result<Vec<i64>, Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.client().await?;
        let ids = ids.to_vec();
        let rows = client
            .query(
                "SELECT osm_id FROM validation WHERE osm_id = ANY($1)",
                &[&ids],
            )
            .await
            .map_err(|err| db_error("validation existence check failed", err))?;
        Ok(rows.iter().map(|row| row.get::<_, i64>(0)).collect())
    }
}
