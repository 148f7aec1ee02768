//! The OSM element model carried through the pipeline.
//!
//! Change files are deltas: an element carries only what the edit touched,
//! so ways and relations may arrive without geometry and are completed
//! later by the geometry builder.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use geo_types::{LineString, MultiLineString, MultiPolygon, Polygon};

/// Tag map of an element. Ordered so emitted SQL is deterministic.
pub type Tags = BTreeMap<String, String>;

/// The mutation an osmChange block applies to its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Modify,
    Remove,
}

impl Action {
    /// The XML element name of the enclosing block.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Remove => "delete",
        }
    }
}

/// The three OSM object kinds (plus nothing else; members referencing
/// relations are refused during geometry assembly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl ElementKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }
}

/// Attribution common to every element in a change file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementMeta {
    pub version: i32,
    pub changeset: i64,
    pub uid: i64,
    pub user: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A node: a point with tags.
#[derive(Debug, Clone, PartialEq)]
pub struct OsmNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: Tags,
    pub action: Action,
    pub meta: ElementMeta,
    /// Set by the polygon filter; non-priority elements contribute
    /// neither statistics nor raw geometry nor validation rows.
    pub priority: bool,
}

impl OsmNode {
    #[must_use]
    pub fn new(id: i64, action: Action) -> Self {
        Self {
            id,
            lat: 0.0,
            lon: 0.0,
            tags: Tags::new(),
            action,
            meta: ElementMeta::default(),
            priority: false,
        }
    }
}

/// Geometry assembled for a way: closed refs become a polygon, open refs
/// a linestring.
#[derive(Debug, Clone, PartialEq)]
pub enum WayGeometry {
    Polygon(Polygon<f64>),
    Line(LineString<f64>),
}

/// A way: an ordered list of node references.
#[derive(Debug, Clone, PartialEq)]
pub struct OsmWay {
    pub id: i64,
    pub refs: Vec<i64>,
    pub tags: Tags,
    pub geometry: Option<WayGeometry>,
    pub action: Action,
    pub meta: ElementMeta,
    pub priority: bool,
}

impl OsmWay {
    #[must_use]
    pub fn new(id: i64, action: Action) -> Self {
        Self {
            id,
            refs: Vec::new(),
            tags: Tags::new(),
            geometry: None,
            action,
            meta: ElementMeta::default(),
            priority: false,
        }
    }

    /// A way is closed when it returns to its first node.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.refs.len() > 2 && self.refs.first() == self.refs.last()
    }
}

/// One `<member>` of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMember {
    pub kind: ElementKind,
    pub reference: i64,
    pub role: String,
}

/// Geometry assembled for a relation.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationGeometry {
    MultiPolygon(MultiPolygon<f64>),
    MultiLine(MultiLineString<f64>),
}

/// A relation: typed members with roles.
#[derive(Debug, Clone, PartialEq)]
pub struct OsmRelation {
    pub id: i64,
    pub members: Vec<RelationMember>,
    pub tags: Tags,
    pub geometry: Option<RelationGeometry>,
    pub action: Action,
    pub meta: ElementMeta,
    pub priority: bool,
}

impl OsmRelation {
    #[must_use]
    pub fn new(id: i64, action: Action) -> Self {
        Self {
            id,
            members: Vec::new(),
            tags: Tags::new(),
            geometry: None,
            action,
            meta: ElementMeta::default(),
            priority: false,
        }
    }

    /// The `type` tag dispatches geometry assembly.
    #[must_use]
    pub fn relation_type(&self) -> Option<&str> {
        self.tags.get("type").map(String::as_str)
    }
}

/// A change-file element as a tagged variant.
#[derive(Debug, Clone, PartialEq)]
pub enum OsmElement {
    Node(OsmNode),
    Way(OsmWay),
    Relation(OsmRelation),
}

impl OsmElement {
    #[must_use]
    pub fn id(&self) -> i64 {
        match self {
            Self::Node(node) => node.id,
            Self::Way(way) => way.id,
            Self::Relation(relation) => relation.id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Node(_) => ElementKind::Node,
            Self::Way(_) => ElementKind::Way,
            Self::Relation(_) => ElementKind::Relation,
        }
    }
}

/// Every element sharing one action inside an osmChange document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub action: Option<Action>,
    pub nodes: Vec<OsmNode>,
    pub ways: Vec<OsmWay>,
    pub relations: Vec<OsmRelation>,
}

impl ChangeBatch {
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self {
            action: Some(action),
            ..Self::default()
        }
    }

    /// The latest element timestamp observed in this batch.
    #[must_use]
    pub fn final_entry(&self) -> Option<DateTime<Utc>> {
        let nodes = self.nodes.iter().filter_map(|node| node.meta.timestamp);
        let ways = self.ways.iter().filter_map(|way| way.meta.timestamp);
        let relations = self
            .relations
            .iter()
            .filter_map(|relation| relation.meta.timestamp);
        nodes.chain(ways).chain(relations).max()
    }
}

/// A fully parsed osmChange document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsmChangeFile {
    pub changes: Vec<ChangeBatch>,
}

impl OsmChangeFile {
    /// The latest element timestamp in the final batch, mirroring the
    /// replication task bookkeeping.
    #[must_use]
    pub fn final_entry(&self) -> Option<DateTime<Utc>> {
        self.changes.last().and_then(ChangeBatch::final_entry)
    }

    /// Iterate every way across all batches.
    pub fn ways(&self) -> impl Iterator<Item = &OsmWay> {
        self.changes.iter().flat_map(|batch| batch.ways.iter())
    }

    /// Iterate every node across all batches.
    pub fn nodes(&self) -> impl Iterator<Item = &OsmNode> {
        self.changes.iter().flat_map(|batch| batch.nodes.iter())
    }

    /// Iterate every relation across all batches.
    pub fn relations(&self) -> impl Iterator<Item = &OsmRelation> {
        self.changes.iter().flat_map(|batch| batch.relations.iter())
    }
}
