//! Ports consumed by the pipeline and implemented by outbound adapters.
//!
//! Tests fake these with in-memory implementations; production wires the
//! planet client and the PostgreSQL adapters.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::Error;
use crate::domain::geometry::NodeLocations;

/// Disposition of one artifact download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Success,
    /// HTTP 404 or a body shorter than the sanity floor.
    RemoteNotFound,
    /// Network, TLS, or partial read after the retry.
    IoError,
}

/// One downloaded artifact.
#[derive(Debug, Clone)]
pub struct Download {
    pub status: DownloadStatus,
    pub data: Vec<u8>,
}

impl Download {
    #[must_use]
    pub fn success(data: Vec<u8>) -> Self {
        Self {
            status: DownloadStatus::Success,
            data,
        }
    }

    #[must_use]
    pub fn failed(status: DownloadStatus) -> Self {
        Self {
            status,
            data: Vec::new(),
        }
    }
}

/// A mirror serving the replication namespace.
#[async_trait]
pub trait ReplicationSource: Send + Sync {
    /// The mirror host this source is bound to.
    fn domain(&self) -> &str;

    /// Fetch one artifact; failures are encoded in the status, not an
    /// error, because the driver treats them as routine.
    async fn download(&self, url: &str) -> Download;

    /// Link targets of a directory index page, used to discover
    /// available state files.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the index cannot be fetched.
    async fn scan_directory(&self, url: &str) -> Result<Vec<String>, Error>;
}

/// Database-backed hydration of objects referenced but not defined by a
/// change file.
#[async_trait]
pub trait RawObjectLookup: Send + Sync {
    /// Coordinates of the given nodes, keyed by id. Unknown ids are
    /// simply absent.
    ///
    /// # Errors
    ///
    /// Returns a database error when the query fails.
    async fn nodes_by_ids(&self, ids: &[i64]) -> Result<NodeLocations, Error>;

    /// Ordered node refs of the given ways, keyed by id.
    ///
    /// # Errors
    ///
    /// Returns a database error when the query fails.
    async fn ways_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>, Error>;

    /// Ways whose refs include any of the given nodes; drives indirect
    /// geometry updates when a node moves.
    ///
    /// # Errors
    ///
    /// Returns a database error when the query fails.
    async fn ways_referencing(&self, node_ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>, Error>;

    /// The subset of the given ids that currently hold validation rows.
    ///
    /// # Errors
    ///
    /// Returns a database error when the query fails.
    async fn validated_ids(&self, ids: &[i64]) -> Result<Vec<i64>, Error>;
}

/// Where a round's merged SQL lands: one transaction per call.
#[async_trait]
pub trait RoundSink: Send + Sync {
    /// Apply a round's merged SQL atomically; an error means the whole
    /// round rolled back.
    ///
    /// # Errors
    ///
    /// Returns a database error when the transaction fails.
    async fn apply_round(&self, sql: &str) -> Result<(), Error>;
}

/// A user record pulled from the tasking-manager database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TmUser {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub date_registered: Option<DateTime<Utc>>,
    pub last_validation_date: Option<DateTime<Utc>>,
    pub tasks_mapped: i32,
    pub tasks_validated: i32,
    pub tasks_invalidated: i32,
    pub projects_mapped: Vec<i64>,
    pub mapping_level: i32,
    pub gender: i32,
    pub role: i32,
}

/// The upstream user directory the periodic sync pulls from.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// All users currently known upstream.
    ///
    /// # Errors
    ///
    /// Returns a database error when the upstream query fails.
    async fn fetch_users(&self) -> Result<Vec<TmUser>, Error>;
}
