//! Changeset metadata records parsed from the changeset replication feed.

use chrono::{DateTime, Utc};
use geo_types::{Coord, LineString, Polygon};

/// Bounding boxes narrower than this in either dimension are expanded so
/// spatial predicates operate on non-degenerate geometry.
pub const BBOX_FUDGE: f64 = 1e-4;

/// Metadata of one OSM editing session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub id: i64,
    pub uid: i64,
    pub user: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Absent while the changeset is still open; some historic records
    /// simply never carry it.
    pub closed_at: Option<DateTime<Utc>>,
    pub open: bool,
    pub num_changes: i64,
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
    pub hashtags: Vec<String>,
    pub editor: String,
    pub source: String,
    pub priority: bool,
}

impl ChangeSet {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self {
            id,
            open: true,
            ..Self::default()
        }
    }

    /// Whether this record should be dropped before any emission.
    ///
    /// Empty changesets draw nothing, and a single-point bbox cannot
    /// intersect anything meaningfully even after expansion.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        if self.num_changes == 0 {
            return true;
        }
        self.max_lon == self.min_lon && self.max_lat == self.min_lat
    }

    /// The changeset bounding box as a closed polygon, expanded by
    /// [`BBOX_FUDGE`] where a dimension collapses below the fudge.
    ///
    /// Returns `None` for degenerate records.
    #[must_use]
    pub fn bbox_polygon(&self) -> Option<Polygon<f64>> {
        if self.is_degenerate() {
            return None;
        }
        let (min_lon, max_lon) = expand_dimension(self.min_lon, self.max_lon);
        let (min_lat, max_lat) = expand_dimension(self.min_lat, self.max_lat);
        let ring = LineString::from(vec![
            Coord {
                x: max_lon,
                y: max_lat,
            },
            Coord {
                x: min_lon,
                y: max_lat,
            },
            Coord {
                x: min_lon,
                y: min_lat,
            },
            Coord {
                x: max_lon,
                y: min_lat,
            },
            Coord {
                x: max_lon,
                y: max_lat,
            },
        ]);
        Some(Polygon::new(ring, vec![]))
    }
}

/// Symmetrically widen an interval narrower than the fudge.
fn expand_dimension(min: f64, max: f64) -> (f64, f64) {
    if (max - min).abs() < BBOX_FUDGE {
        (min - BBOX_FUDGE / 2.0, max + BBOX_FUDGE / 2.0)
    } else {
        (min, max)
    }
}

/// A fully parsed changeset replication document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSetFile {
    pub changes: Vec<ChangeSet>,
    /// The latest `closed_at` observed, used to place this file in time.
    pub last_closed_at: Option<DateTime<Utc>>,
}

impl ChangeSetFile {
    /// The timestamp that best positions this file in the stream:
    /// the newest close, falling back to the final record's creation.
    #[must_use]
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_closed_at
            .or_else(|| self.changes.last().and_then(|change| change.created_at))
    }
}
