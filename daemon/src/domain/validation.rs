//! Feature validation: the plugin capability and the built-in rule set.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use geo_types::Point;

use crate::domain::{ElementKind, OsmNode, OsmRelation, OsmWay};

/// One condition a validator can attach to a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValidationFlag {
    NoTags,
    Complete,
    Incomplete,
    BadValue,
    Correct,
    BadGeom,
    Overlapping,
    Duplicate,
}

impl ValidationFlag {
    /// The value stored in the database status array.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoTags => "notags",
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
            Self::BadValue => "badvalue",
            Self::Correct => "correct",
            Self::BadGeom => "badgeom",
            Self::Overlapping => "overlapping",
            Self::Duplicate => "duplicate",
        }
    }

    /// Flags the driver manages globally: when a plugin result omits one
    /// of these, the driver explicitly clears it.
    #[must_use]
    pub fn driver_managed() -> [Self; 3] {
        [Self::Overlapping, Self::Duplicate, Self::BadGeom]
    }
}

/// The validation result for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationStatus {
    pub osm_id: i64,
    pub kind: ElementKind,
    pub user_id: i64,
    pub timestamp: Option<DateTime<Utc>>,
    /// Corner angle measured by geometry checks; zero when not computed.
    pub angle: f64,
    pub center: Option<Point<f64>>,
    pub flags: BTreeSet<ValidationFlag>,
}

impl ValidationStatus {
    #[must_use]
    pub fn new(osm_id: i64, kind: ElementKind) -> Self {
        Self {
            osm_id,
            kind,
            user_id: 0,
            timestamp: None,
            angle: 0.0,
            center: None,
            flags: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn has(&self, flag: ValidationFlag) -> bool {
        self.flags.contains(&flag)
    }

    #[must_use]
    pub fn with_flag(mut self, flag: ValidationFlag) -> Self {
        self.flags.insert(flag);
        self
    }
}

/// The capability a validator rule set implements.
///
/// Loaded from a shared library at startup, or the built-in default when
/// no plugin is configured. Loading happens once; dispatch is dynamic.
pub trait ValidatorPlugin: Send + Sync {
    fn check_node(&self, node: &OsmNode) -> ValidationStatus;
    fn check_way(&self, way: &OsmWay) -> ValidationStatus;
    fn check_relation(&self, relation: &OsmRelation) -> ValidationStatus;
}

/// Building values the default rule set accepts without complaint.
const KNOWN_BUILDING_VALUES: [&str; 14] = [
    "yes",
    "house",
    "residential",
    "commercial",
    "industrial",
    "school",
    "hospital",
    "apartments",
    "detached",
    "garage",
    "shed",
    "church",
    "hut",
    "roof",
];

/// The built-in rule set used when no plugin path is configured.
///
/// A node that is part of a way legitimately has no tags, so untagged
/// nodes pass silently; untagged ways and relations do not.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidation;

impl DefaultValidation {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn base(osm_id: i64, kind: ElementKind, user_id: i64, timestamp: Option<DateTime<Utc>>) -> ValidationStatus {
        let mut status = ValidationStatus::new(osm_id, kind);
        status.user_id = user_id;
        status.timestamp = timestamp;
        status
    }
}

impl ValidatorPlugin for DefaultValidation {
    fn check_node(&self, node: &OsmNode) -> ValidationStatus {
        let mut status = Self::base(node.id, ElementKind::Node, node.meta.uid, node.meta.timestamp);
        status.center = Some(Point::new(node.lon, node.lat));
        if node.tags.is_empty() {
            return status;
        }
        if let Some(value) = node.tags.get("amenity") {
            if value.trim().is_empty() {
                status.flags.insert(ValidationFlag::BadValue);
            } else {
                status.flags.insert(ValidationFlag::Correct);
            }
        }
        status
    }

    fn check_way(&self, way: &OsmWay) -> ValidationStatus {
        let mut status = Self::base(way.id, ElementKind::Way, way.meta.uid, way.meta.timestamp);
        if way.tags.is_empty() {
            status.flags.insert(ValidationFlag::NoTags);
            return status;
        }
        if let Some(value) = way.tags.get("building") {
            if KNOWN_BUILDING_VALUES.contains(&value.as_str()) {
                status.flags.insert(ValidationFlag::Correct);
                status.flags.insert(ValidationFlag::Complete);
            } else {
                status.flags.insert(ValidationFlag::BadValue);
            }
            if way.geometry.is_none() {
                status.flags.insert(ValidationFlag::Incomplete);
            }
        }
        status
    }

    fn check_relation(&self, relation: &OsmRelation) -> ValidationStatus {
        let mut status = Self::base(
            relation.id,
            ElementKind::Relation,
            relation.meta.uid,
            relation.meta.timestamp,
        );
        if relation.tags.is_empty() {
            status.flags.insert(ValidationFlag::NoTags);
        }
        status
    }
}
