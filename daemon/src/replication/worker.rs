//! Worker tasks: turn one remote artifact into a `TaskOutcome`.
//!
//! A worker fetches (or reads from the filesystem cache), decompresses,
//! parses, filters, and accumulates SQL. It never touches the database
//! write path itself; the driver merges and commits per round.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::domain::{
    Action, DownloadStatus, ElementKind, Error, ObjectCache, OsmChangeFile, PriorityArea,
    RawObjectLookup, ReplicationSource, StatsCategories, ValidationFlag, ValidationStatus,
    ValidatorPlugin, build_geometries, collect_stats, missing_references, rebuild_affected_ways,
};
use crate::outbound::persistence::{raw_sql, stats_sql, validation_sql};
use crate::parse::{decompress, read_changeset_xml, read_osmchange_xml};
use crate::replication::{RemoteUrl, TaskOutcome, TaskStatus};

/// Rotations attempted before a download failure is final.
pub const MAX_MIRROR_RETRIES: usize = 4;

/// Fetch an artifact, trying mirrors in rotation order.
///
/// A file already present in the local cache short-circuits the network
/// entirely; a fresh download is persisted back when caching is on.
async fn obtain_artifact(
    remote: &RemoteUrl,
    mirrors: &[Arc<dyn ReplicationSource>],
    start: usize,
) -> (DownloadStatus, Vec<u8>) {
    if let Some(path) = remote.filespec()
        && let Ok(data) = std::fs::read(&path)
    {
        debug!(path = %path.display(), "using cached artifact");
        return (DownloadStatus::Success, data);
    }

    let mut last = DownloadStatus::IoError;
    for attempt in 0..MAX_MIRROR_RETRIES.min(mirrors.len().max(1)) {
        let Some(source) = mirrors.get((start + attempt) % mirrors.len().max(1)) else {
            break;
        };
        let mut target = remote.clone();
        target.update_domain(source.domain());
        let download = source.download(&target.url()).await;
        match download.status {
            DownloadStatus::Success => {
                persist_artifact(remote, &download.data);
                return (DownloadStatus::Success, download.data);
            }
            status => {
                debug!(
                    url = %target.url(),
                    ?status,
                    "download failed, rotating mirror"
                );
                last = status;
            }
        }
    }
    (last, Vec::new())
}

fn persist_artifact(remote: &RemoteUrl, data: &[u8]) {
    let Some(path) = remote.filespec() else {
        return;
    };
    if let Some(parent) = path.parent()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        warn!(path = %path.display(), error = %err, "cannot create cache directory");
        return;
    }
    if let Err(err) = std::fs::write(&path, data) {
        warn!(path = %path.display(), error = %err, "cannot cache artifact");
    }
}

fn status_for(download: DownloadStatus) -> TaskStatus {
    match download {
        DownloadStatus::Success => TaskStatus::Success,
        DownloadStatus::RemoteNotFound => TaskStatus::RemoteNotFound,
        DownloadStatus::IoError => TaskStatus::IoError,
    }
}

/// Processes changeset replication files.
#[derive(Clone)]
pub struct ChangesetWorker {
    pub mirrors: Arc<Vec<Arc<dyn ReplicationSource>>>,
    pub area: Arc<PriorityArea>,
}

impl ChangesetWorker {
    /// Fetch and process one changeset dump.
    pub async fn process(&self, remote: RemoteUrl, mirror_index: usize) -> TaskOutcome {
        let mut outcome = TaskOutcome::new(remote.triple_path());
        let (status, data) = obtain_artifact(&remote, &self.mirrors, mirror_index).await;
        if status != DownloadStatus::Success {
            outcome.status = status_for(status);
            return outcome;
        }

        let mut file = match decompress(&data).and_then(|xml| read_changeset_xml(&xml)) {
            Ok(file) => file,
            Err(err) => {
                error!(url = %remote.url(), error = %err, "cannot parse changeset dump");
                outcome.status = TaskStatus::ParseError;
                return outcome;
            }
        };

        outcome.timestamp = file.latest_timestamp();
        self.area.filter_changesets(&mut file);
        for change in &file.changes {
            if change.is_degenerate() || !change.priority {
                continue;
            }
            outcome.sql.push_str(&stats_sql::changeset_upsert(change));
        }
        outcome.status = TaskStatus::Success;
        outcome
    }
}

/// Processes osmChange replication files.
#[derive(Clone)]
pub struct ChangeWorker {
    pub mirrors: Arc<Vec<Arc<dyn ReplicationSource>>>,
    pub area: Arc<PriorityArea>,
    pub categories: Arc<StatsCategories>,
    pub plugin: Arc<dyn ValidatorPlugin>,
    pub lookup: Arc<dyn RawObjectLookup>,
    pub disable_stats: bool,
    pub disable_validation: bool,
    pub disable_raw: bool,
}

impl ChangeWorker {
    /// Fetch and process one osmChange file.
    pub async fn process(&self, remote: RemoteUrl, mirror_index: usize) -> TaskOutcome {
        let mut outcome = TaskOutcome::new(remote.triple_path());
        let (status, data) = obtain_artifact(&remote, &self.mirrors, mirror_index).await;
        if status != DownloadStatus::Success {
            outcome.status = status_for(status);
            return outcome;
        }

        let mut file = match decompress(&data).and_then(|xml| read_osmchange_xml(&xml)) {
            Ok(file) => file,
            Err(err) => {
                error!(url = %remote.url(), error = %err, "cannot parse osmChange");
                outcome.status = TaskStatus::ParseError;
                return outcome;
            }
        };
        outcome.timestamp = file.final_entry();

        match self.accumulate(&mut file).await {
            Ok(sql) => {
                outcome.sql = sql;
                outcome.status = TaskStatus::Success;
            }
            Err(err) => {
                error!(url = %remote.url(), error = %err, "change processing failed");
                outcome.status = TaskStatus::IoError;
            }
        }
        outcome
    }

    async fn accumulate(&self, file: &mut OsmChangeFile) -> Result<String, Error> {
        let mut sql = String::new();

        // Hydrate everything the delta references but does not define,
        // plus ways whose geometry a modified node invalidates.
        let (mut cache, affected) = if self.disable_raw {
            (ObjectCache::default(), HashMap::new())
        } else {
            self.hydrate(file).await?
        };
        let failures = build_geometries(file, &mut cache);
        self.area.filter_changes(file, &cache.nodes);

        if !self.disable_stats {
            let now = Utc::now();
            for stats in collect_stats(file, &self.categories).values() {
                if stats.is_empty() {
                    continue;
                }
                sql.push_str(&stats_sql::stats_upsert(stats, now));
            }
        }

        let mut removed_ids: Vec<i64> = Vec::new();
        if !self.disable_validation || !self.disable_raw {
            for batch in &file.changes {
                for node in &batch.nodes {
                    if !node.priority && node.action != Action::Remove {
                        continue;
                    }
                    if !self.disable_validation && node.action == Action::Remove {
                        removed_ids.push(node.id);
                    }
                    if !self.disable_raw {
                        sql.push_str(&raw_sql::node_change(node));
                    }
                }
                for way in &batch.ways {
                    if !way.priority && way.action != Action::Remove {
                        continue;
                    }
                    if !self.disable_validation && way.action == Action::Remove {
                        removed_ids.push(way.id);
                    }
                    if !self.disable_raw {
                        sql.push_str(&raw_sql::way_change(way));
                    }
                }
                for relation in &batch.relations {
                    if !relation.priority && relation.action != Action::Remove {
                        continue;
                    }
                    if !self.disable_validation && relation.action == Action::Remove {
                        removed_ids.push(relation.id);
                    }
                    if !self.disable_raw {
                        sql.push_str(&raw_sql::relation_change(relation));
                    }
                }
            }
        }

        if !self.disable_raw {
            for (id, geometry) in rebuild_affected_ways(file, &cache, &affected) {
                sql.push_str(&raw_sql::way_geometry_update(id, &geometry));
            }
        }

        if !self.disable_validation {
            sql.push_str(&self.validate(file, &failures).await?);
            sql.push_str(&validation_sql::delete_many(&removed_ids));
        }
        Ok(sql)
    }

    async fn hydrate(
        &self,
        file: &OsmChangeFile,
    ) -> Result<(ObjectCache, HashMap<i64, Vec<i64>>), Error> {
        let missing = missing_references(file);
        let mut cache = ObjectCache {
            nodes: self.lookup.nodes_by_ids(&missing.nodes).await?,
            ways: self.lookup.ways_by_ids(&missing.ways).await?,
        };

        let modified: Vec<i64> = file
            .nodes()
            .filter(|node| node.action == Action::Modify)
            .map(|node| node.id)
            .collect();
        let affected = if modified.is_empty() {
            HashMap::new()
        } else {
            self.lookup.ways_referencing(&modified).await?
        };

        // Hydrated ways may reference nodes the file knows nothing about.
        let in_file: HashSet<i64> = file.nodes().map(|node| node.id).collect();
        let mut extra: Vec<i64> = cache
            .ways
            .values()
            .chain(affected.values())
            .flatten()
            .filter(|id| !cache.nodes.contains_key(id) && !in_file.contains(id))
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        extra.sort_unstable();
        if !extra.is_empty() {
            cache.nodes.extend(self.lookup.nodes_by_ids(&extra).await?);
        }
        Ok((cache, affected))
    }

    async fn validate(
        &self,
        file: &OsmChangeFile,
        failures: &[crate::domain::BadGeometry],
    ) -> Result<String, Error> {
        let badgeom_ways: HashSet<i64> = failures
            .iter()
            .filter(|failure| failure.kind == ElementKind::Way)
            .map(|failure| failure.id)
            .collect();
        let badgeom_relations: HashSet<i64> = failures
            .iter()
            .filter(|failure| failure.kind == ElementKind::Relation)
            .map(|failure| failure.id)
            .collect();

        let mut sql = String::new();
        let mut empty_status: Vec<i64> = Vec::new();
        let mut emit = |status: ValidationStatus, sql: &mut String, empty: &mut Vec<i64>| {
            if status.flags.is_empty() {
                empty.push(status.osm_id);
                return;
            }
            sql.push_str(&validation_sql::status_upsert(&status));
            for flag in ValidationFlag::driver_managed() {
                if !status.has(flag) {
                    sql.push_str(&validation_sql::clear_flag(status.osm_id, flag));
                }
            }
        };

        for batch in &file.changes {
            for node in &batch.nodes {
                if !node.priority || node.action == Action::Remove {
                    continue;
                }
                let status = self.plugin.check_node(node);
                emit(status, &mut sql, &mut empty_status);
            }
            for way in &batch.ways {
                if !way.priority || way.action == Action::Remove {
                    continue;
                }
                let mut status = self.plugin.check_way(way);
                if badgeom_ways.contains(&way.id) {
                    status.flags.insert(ValidationFlag::BadGeom);
                }
                emit(status, &mut sql, &mut empty_status);
            }
            for relation in &batch.relations {
                if !relation.priority || relation.action == Action::Remove {
                    continue;
                }
                let mut status = self.plugin.check_relation(relation);
                if badgeom_relations.contains(&relation.id) {
                    status.flags.insert(ValidationFlag::BadGeom);
                }
                emit(status, &mut sql, &mut empty_status);
            }
        }

        // Features that validate clean only need a delete when a stale
        // row actually exists.
        if !empty_status.is_empty() {
            let stale = self.lookup.validated_ids(&empty_status).await?;
            sql.push_str(&validation_sql::delete_many(&stale));
        }
        Ok(sql)
    }
}
