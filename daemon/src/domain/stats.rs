//! Per-user contribution statistics over a configurable tag taxonomy.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::domain::{Action, OsmChangeFile, Tags};

/// Maps tag keys to the statistics category they count towards.
///
/// Only keys present here contribute; everything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsCategories {
    categories: BTreeMap<String, String>,
}

impl Default for StatsCategories {
    fn default() -> Self {
        let categories = [
            ("building", "building"),
            ("highway", "highway"),
            ("waterway", "waterway"),
            ("amenity", "poi"),
            ("place", "place"),
            ("landuse", "landuse"),
        ]
        .into_iter()
        .map(|(key, category)| (key.to_owned(), category.to_owned()))
        .collect();
        Self { categories }
    }
}

impl StatsCategories {
    /// Build a taxonomy from explicit key-to-category pairs.
    #[must_use]
    pub fn from_map(categories: BTreeMap<String, String>) -> Self {
        if categories.is_empty() {
            Self::default()
        } else {
            Self { categories }
        }
    }

    /// The categories an element's tags count towards.
    #[must_use]
    pub fn scan_tags(&self, tags: &Tags) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|(key, _)| tags.contains_key(*key))
            .map(|(_, category)| category.as_str())
            .collect()
    }
}

/// Tallies for one `(change, user)` pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeStats {
    pub change_id: i64,
    pub user_id: i64,
    pub username: String,
    pub created_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub added: BTreeMap<String, i64>,
    pub modified: BTreeMap<String, i64>,
    pub deleted: BTreeMap<String, i64>,
}

impl ChangeStats {
    /// Whether this record would emit nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    fn bump(&mut self, action: Action, category: &str) {
        let bucket = match action {
            Action::Create => &mut self.added,
            Action::Modify => &mut self.modified,
            Action::Remove => &mut self.deleted,
        };
        *bucket.entry(category.to_owned()).or_default() += 1;
    }
}

/// Collect per-change statistics from a filtered change file.
///
/// Only priority elements contribute. Records are keyed by change id;
/// one changeset belongs to exactly one user.
#[must_use]
pub fn collect_stats(
    file: &OsmChangeFile,
    categories: &StatsCategories,
) -> BTreeMap<i64, ChangeStats> {
    let mut stats: BTreeMap<i64, ChangeStats> = BTreeMap::new();

    let mut record = |action: Action,
                      change_id: i64,
                      uid: i64,
                      user: &str,
                      timestamp: Option<DateTime<Utc>>,
                      tags: &Tags| {
        let matched = categories.scan_tags(tags);
        if matched.is_empty() {
            return;
        }
        let entry = stats.entry(change_id).or_insert_with(|| ChangeStats {
            change_id,
            user_id: uid,
            username: user.to_owned(),
            created_at: timestamp,
            closed_at: timestamp,
            ..ChangeStats::default()
        });
        if let Some(timestamp) = timestamp
            && entry.closed_at.is_none_or(|latest| timestamp > latest)
        {
            entry.closed_at = Some(timestamp);
        }
        for category in matched {
            entry.bump(action, category);
        }
    };

    for batch in &file.changes {
        for node in batch.nodes.iter().filter(|node| node.priority) {
            record(
                node.action,
                node.meta.changeset,
                node.meta.uid,
                &node.meta.user,
                node.meta.timestamp,
                &node.tags,
            );
        }
        for way in batch.ways.iter().filter(|way| way.priority) {
            record(
                way.action,
                way.meta.changeset,
                way.meta.uid,
                &way.meta.user,
                way.meta.timestamp,
                &way.tags,
            );
        }
        for relation in batch.relations.iter().filter(|relation| relation.priority) {
            record(
                relation.action,
                relation.meta.changeset,
                relation.meta.uid,
                &relation.meta.user,
                relation.meta.timestamp,
                &relation.tags,
            );
        }
    }
    stats
}
