//! The priority polygon: the user-configured region of interest.
//!
//! Only changes intersecting this region affect statistics, raw geometry
//! and validation; removals are exempt so stale rows still clean up.

use std::path::Path;

use geo::Intersects;
use geo_types::{Coord, LineString, MultiPoint, MultiPolygon, Point, Polygon};

use crate::domain::geometry::NodeLocations;
use crate::domain::{ChangeSetFile, Error, OsmChangeFile, OsmRelation, OsmWay};
use crate::domain::{RelationGeometry, WayGeometry};

/// The configured region of interest.
///
/// An unconfigured or empty region means everything is of interest,
/// which is the behaviour the test corpus of the geometry builder
/// exercises.
#[derive(Debug, Clone, Default)]
pub struct PriorityArea {
    area: Option<MultiPolygon<f64>>,
}

impl PriorityArea {
    /// A region covering the whole planet.
    #[must_use]
    pub fn everywhere() -> Self {
        Self::default()
    }

    /// Wrap an explicit multipolygon; an empty one covers everything.
    #[must_use]
    pub fn from_multipolygon(area: MultiPolygon<f64>) -> Self {
        if area.0.is_empty() {
            Self::default()
        } else {
            Self { area: Some(area) }
        }
    }

    /// Load the region from a GeoJSON document containing a `Polygon` or
    /// `MultiPolygon` geometry (bare geometry, Feature, or the first
    /// feature of a FeatureCollection).
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the file cannot be read and a
    /// decode error when the document carries no usable geometry.
    pub fn from_geojson_path(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_geojson_str(&text)
    }

    /// Parse the region from GeoJSON text.
    ///
    /// # Errors
    ///
    /// Returns a decode error when the document carries no usable
    /// `Polygon` or `MultiPolygon` geometry.
    pub fn from_geojson_str(text: &str) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|err| Error::decode(format!("bad GeoJSON: {err}")))?;
        let geometry = find_geometry(&value)
            .ok_or_else(|| Error::decode("GeoJSON carries no Polygon or MultiPolygon"))?;
        Ok(Self::from_multipolygon(geometry))
    }

    /// Whether a region was actually configured.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.area.is_some()
    }

    /// Whether a point falls inside the region.
    #[must_use]
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        match &self.area {
            None => true,
            Some(area) => area.intersects(&Point::new(lon, lat)),
        }
    }

    fn intersects_way_geometry(&self, geometry: &WayGeometry) -> bool {
        let Some(area) = &self.area else { return true };
        match geometry {
            WayGeometry::Polygon(polygon) => area.intersects(polygon),
            WayGeometry::Line(line) => area.intersects(line),
        }
    }

    fn intersects_relation_geometry(&self, geometry: &RelationGeometry) -> bool {
        let Some(area) = &self.area else { return true };
        match geometry {
            RelationGeometry::MultiPolygon(multi) => area.intersects(multi),
            RelationGeometry::MultiLine(multi) => multi
                .0
                .iter()
                .any(|line: &LineString<f64>| area.intersects(line)),
        }
    }

    fn intersects_known_coords(&self, refs: &[i64], known: &NodeLocations) -> bool {
        let Some(area) = &self.area else { return true };
        let points: Vec<Point<f64>> = refs
            .iter()
            .filter_map(|reference| known.get(reference))
            .map(|coord| Point::new(coord.x, coord.y))
            .collect();
        if points.is_empty() {
            // Nothing resolvable to test against; keep the element rather
            // than silently dropping it.
            return true;
        }
        area.intersects(&MultiPoint::from(points))
    }

    fn way_priority(&self, way: &OsmWay, known: &NodeLocations) -> bool {
        match &way.geometry {
            Some(geometry) => self.intersects_way_geometry(geometry),
            None => self.intersects_known_coords(&way.refs, known),
        }
    }

    fn relation_priority(&self, relation: &OsmRelation) -> bool {
        match &relation.geometry {
            Some(geometry) => self.intersects_relation_geometry(geometry),
            None => true,
        }
    }

    /// Tag every element of a change file with its priority flag.
    pub fn filter_changes(&self, file: &mut OsmChangeFile, known: &NodeLocations) {
        for batch in &mut file.changes {
            for node in &mut batch.nodes {
                node.priority = self.contains_point(node.lon, node.lat);
            }
            for way in &mut batch.ways {
                way.priority = self.way_priority(way, known);
            }
            for relation in &mut batch.relations {
                relation.priority = self.relation_priority(relation);
            }
        }
    }

    /// Tag every changeset record with its priority flag.
    pub fn filter_changesets(&self, file: &mut ChangeSetFile) {
        for change in &mut file.changes {
            change.priority = match (&self.area, change.bbox_polygon()) {
                (None, _) => !change.is_degenerate(),
                (Some(area), Some(bbox)) => area.intersects(&bbox),
                (Some(_), None) => false,
            };
        }
    }
}

/// Walk a GeoJSON value down to the first Polygon/MultiPolygon geometry.
fn find_geometry(value: &serde_json::Value) -> Option<MultiPolygon<f64>> {
    match value.get("type").and_then(serde_json::Value::as_str)? {
        "FeatureCollection" => value
            .get("features")?
            .as_array()?
            .iter()
            .find_map(find_geometry),
        "Feature" => find_geometry(value.get("geometry")?),
        "Polygon" => {
            let rings = parse_rings(value.get("coordinates")?)?;
            Some(MultiPolygon(vec![rings_to_polygon(rings)?]))
        }
        "MultiPolygon" => {
            let polygons = value
                .get("coordinates")?
                .as_array()?
                .iter()
                .map(|poly| parse_rings(poly).and_then(rings_to_polygon))
                .collect::<Option<Vec<_>>>()?;
            Some(MultiPolygon(polygons))
        }
        _ => None,
    }
}

fn parse_rings(value: &serde_json::Value) -> Option<Vec<LineString<f64>>> {
    value
        .as_array()?
        .iter()
        .map(|ring| {
            let coords = ring
                .as_array()?
                .iter()
                .map(|position| {
                    let pair = position.as_array()?;
                    Some(Coord {
                        x: pair.first()?.as_f64()?,
                        y: pair.get(1)?.as_f64()?,
                    })
                })
                .collect::<Option<Vec<_>>>()?;
            Some(LineString::from(coords))
        })
        .collect()
}

fn rings_to_polygon(mut rings: Vec<LineString<f64>>) -> Option<Polygon<f64>> {
    if rings.is_empty() {
        return None;
    }
    let exterior = rings.remove(0);
    Some(Polygon::new(exterior, rings))
}
