//! Shared fixtures for the behavioural tests: gzip helpers, scripted
//! mirrors, in-memory lookup and a recording sink.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use geo_types::Coord;
use pathwatch::domain::{
    Download, DownloadStatus, Error, NodeLocations, RawObjectLookup, ReplicationSource, RoundSink,
};

/// Gzip a fixture payload the way the planet serves artifacts.
pub fn gz(payload: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload.as_bytes())
        .expect("encode fixture");
    encoder.finish().expect("finish fixture")
}

/// A mirror that answers from a canned URL map and records every
/// request it sees.
pub struct ScriptedSource {
    domain: String,
    responses: HashMap<String, Download>,
    pub requests: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            responses: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_response(mut self, url: impl Into<String>, download: Download) -> Self {
        self.responses.insert(url.into(), download);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl ReplicationSource for ScriptedSource {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn download(&self, url: &str) -> Download {
        self.requests
            .lock()
            .expect("requests lock")
            .push(url.to_owned());
        self.responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| Download::failed(DownloadStatus::RemoteNotFound))
    }

    async fn scan_directory(&self, _url: &str) -> Result<Vec<String>, Error> {
        Ok(Vec::new())
    }
}

/// An in-memory raw-object store standing in for the database.
#[derive(Default)]
pub struct MemoryLookup {
    pub nodes: NodeLocations,
    pub ways: HashMap<i64, Vec<i64>>,
    pub validated: Vec<i64>,
}

impl MemoryLookup {
    pub fn with_node(mut self, id: i64, lon: f64, lat: f64) -> Self {
        self.nodes.insert(id, Coord { x: lon, y: lat });
        self
    }

    pub fn with_way(mut self, id: i64, refs: &[i64]) -> Self {
        self.ways.insert(id, refs.to_vec());
        self
    }

    pub fn with_validated(mut self, id: i64) -> Self {
        self.validated.push(id);
        self
    }
}

#[async_trait]
impl RawObjectLookup for MemoryLookup {
    async fn nodes_by_ids(&self, ids: &[i64]) -> Result<NodeLocations, Error> {
        Ok(ids
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|coord| (*id, *coord)))
            .collect())
    }

    async fn ways_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>, Error> {
        Ok(ids
            .iter()
            .filter_map(|id| self.ways.get(id).map(|refs| (*id, refs.clone())))
            .collect())
    }

    async fn ways_referencing(&self, node_ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>, Error> {
        Ok(self
            .ways
            .iter()
            .filter(|(_, refs)| refs.iter().any(|reference| node_ids.contains(reference)))
            .map(|(id, refs)| (*id, refs.clone()))
            .collect())
    }

    async fn validated_ids(&self, ids: &[i64]) -> Result<Vec<i64>, Error> {
        Ok(ids
            .iter()
            .copied()
            .filter(|id| self.validated.contains(id))
            .collect())
    }
}

/// An in-memory state store standing in for the `states` table.
#[derive(Default)]
pub struct MemoryStateStore {
    pub states: Mutex<Vec<pathwatch::replication::StateFile>>,
}

#[async_trait]
impl pathwatch::replication::StateStore for MemoryStateStore {
    async fn last_state(
        &self,
        frequency: pathwatch::replication::ReplicationFrequency,
    ) -> Result<Option<pathwatch::replication::StateFile>, Error> {
        Ok(self
            .states
            .lock()
            .expect("states lock")
            .iter()
            .filter(|state| state.frequency == Some(frequency))
            .max_by_key(|state| state.sequence)
            .cloned())
    }

    async fn first_state_after(
        &self,
        frequency: pathwatch::replication::ReplicationFrequency,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<pathwatch::replication::StateFile>, Error> {
        Ok(self
            .states
            .lock()
            .expect("states lock")
            .iter()
            .filter(|state| {
                state.frequency == Some(frequency)
                    && state.timestamp.is_some_and(|ts| ts >= timestamp)
            })
            .min_by_key(|state| state.timestamp)
            .cloned())
    }

    async fn write_state(&self, state: &pathwatch::replication::StateFile) -> Result<(), Error> {
        let mut states = self.states.lock().expect("states lock");
        states.retain(|known| !(known.frequency == state.frequency && known.path == state.path));
        states.push(state.clone());
        Ok(())
    }
}

/// A clock pinned to one instant, for deterministic round behaviour.
pub struct FixedClock(pub chrono::DateTime<chrono::Utc>);

impl pathwatch::replication::Clock for FixedClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.0
    }
}

/// Records every committed round instead of touching a database.
#[derive(Default)]
pub struct RecordingSink {
    pub rounds: Mutex<Vec<String>>,
    pub fail_next: Mutex<bool>,
}

impl RecordingSink {
    pub fn committed(&self) -> Vec<String> {
        self.rounds.lock().expect("rounds lock").clone()
    }
}

#[async_trait]
impl RoundSink for RecordingSink {
    async fn apply_round(&self, sql: &str) -> Result<(), Error> {
        let mut fail = self.fail_next.lock().expect("fail lock");
        if *fail {
            *fail = false;
            return Err(Error::database("injected transaction failure"));
        }
        drop(fail);
        self.rounds
            .lock()
            .expect("rounds lock")
            .push(sql.to_owned());
        Ok(())
    }
}
