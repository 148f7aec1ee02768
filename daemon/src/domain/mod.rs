//! Domain model of the replication pipeline: elements, changesets,
//! statistics, validation, geometry, and the ports adapters implement.

pub mod changeset;
pub mod element;
pub mod error;
pub mod geometry;
pub mod ports;
pub mod priority;
pub mod stats;
pub mod validation;

pub use changeset::{BBOX_FUDGE, ChangeSet, ChangeSetFile};
pub use element::{
    Action, ChangeBatch, ElementKind, ElementMeta, OsmChangeFile, OsmElement, OsmNode,
    OsmRelation, OsmWay, RelationGeometry, RelationMember, Tags, WayGeometry,
};
pub use error::Error;
pub use geometry::{
    BadGeometry, MissingRefs, NodeLocations, ObjectCache, build_geometries, missing_references,
    rebuild_affected_ways,
};
pub use ports::{
    Download, DownloadStatus, RawObjectLookup, ReplicationSource, RoundSink, TmUser, UserDirectory,
};
pub use priority::PriorityArea;
pub use stats::{ChangeStats, StatsCategories, collect_stats};
pub use validation::{DefaultValidation, ValidationFlag, ValidationStatus, ValidatorPlugin};
