//! Geometry reconstruction from change fragments.
//!
//! Change files are deltas: a modified way may omit geometry, and a
//! relation references ways and nodes living outside the file. The
//! builder completes geometry from the union of in-file elements and the
//! cache hydrated from the database, with the in-file version winning on
//! conflict.

use std::collections::{HashMap, HashSet};

use geo::Contains;
use geo_types::{Coord, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use tracing::warn;

use crate::domain::{
    ElementKind, OsmChangeFile, RelationGeometry, RelationMember, WayGeometry,
};

/// Resolved node coordinates: in-file nodes plus database hydration.
pub type NodeLocations = HashMap<i64, Coord<f64>>;

/// Working set of resolved objects for one change file.
#[derive(Debug, Clone, Default)]
pub struct ObjectCache {
    pub nodes: NodeLocations,
    /// Way id to its ordered node refs.
    pub ways: HashMap<i64, Vec<i64>>,
}

impl ObjectCache {
    /// Absorb the in-file elements. Called after database hydration so
    /// the in-file version wins.
    pub fn absorb_file(&mut self, file: &OsmChangeFile) {
        for node in file.nodes() {
            self.nodes.insert(node.id, Coord {
                x: node.lon,
                y: node.lat,
            });
        }
        for way in file.ways() {
            if !way.refs.is_empty() {
                self.ways.insert(way.id, way.refs.clone());
            }
        }
    }
}

/// References a change file needs that it does not itself define.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingRefs {
    pub nodes: Vec<i64>,
    pub ways: Vec<i64>,
}

impl MissingRefs {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.ways.is_empty()
    }
}

/// Scan a change file for node refs and way members that must be
/// hydrated from the database before geometry can be assembled.
#[must_use]
pub fn missing_references(file: &OsmChangeFile) -> MissingRefs {
    let in_file_nodes: HashSet<i64> = file.nodes().map(|node| node.id).collect();
    let in_file_ways: HashSet<i64> = file.ways().map(|way| way.id).collect();

    let mut nodes: HashSet<i64> = HashSet::new();
    let mut ways: HashSet<i64> = HashSet::new();
    for way in file.ways() {
        nodes.extend(
            way.refs
                .iter()
                .filter(|reference| !in_file_nodes.contains(reference)),
        );
    }
    for relation in file.relations() {
        for member in &relation.members {
            match member.kind {
                ElementKind::Node => {
                    if !in_file_nodes.contains(&member.reference) {
                        nodes.insert(member.reference);
                    }
                }
                ElementKind::Way => {
                    if !in_file_ways.contains(&member.reference) {
                        ways.insert(member.reference);
                    }
                }
                // Relation members are refused during assembly; there is
                // nothing useful to hydrate for them.
                ElementKind::Relation => {}
            }
        }
    }

    let mut nodes: Vec<i64> = nodes.into_iter().collect();
    let mut ways: Vec<i64> = ways.into_iter().collect();
    nodes.sort_unstable();
    ways.sort_unstable();
    MissingRefs { nodes, ways }
}

/// A feature whose geometry could not be assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadGeometry {
    pub id: i64,
    pub kind: ElementKind,
}

/// Assemble geometry for every way and relation in the file.
///
/// Ways with unresolved refs are materialized without geometry and
/// reported, never silently dropped. Relations referencing relations are
/// refused and reported.
pub fn build_geometries(file: &mut OsmChangeFile, cache: &mut ObjectCache) -> Vec<BadGeometry> {
    cache.absorb_file(file);
    let mut failures = Vec::new();

    for batch in &mut file.changes {
        for way in &mut batch.ways {
            if way.refs.is_empty() {
                continue;
            }
            match assemble_way(&way.refs, way.is_closed(), &cache.nodes) {
                Some(geometry) => way.geometry = Some(geometry),
                None => {
                    warn!(way = way.id, "way has unresolved node refs, no geometry");
                    failures.push(BadGeometry {
                        id: way.id,
                        kind: ElementKind::Way,
                    });
                }
            }
        }
        for relation in &mut batch.relations {
            let assembled = match relation.relation_type() {
                Some("multipolygon") => assemble_multipolygon(&relation.members, cache),
                Some("multilinestring") => assemble_multilinestring(&relation.members, cache),
                // Other relation types are not materialized here.
                _ => continue,
            };
            match assembled {
                Ok(geometry) => relation.geometry = Some(geometry),
                Err(reason) => {
                    warn!(relation = relation.id, reason, "relation geometry refused");
                    failures.push(BadGeometry {
                        id: relation.id,
                        kind: ElementKind::Relation,
                    });
                }
            }
        }
    }
    failures
}

/// Rebuild geometry for database ways affected by nodes modified in this
/// file. Returns `(way id, rebuilt geometry)` pairs ready for emission.
#[must_use]
pub fn rebuild_affected_ways(
    file: &OsmChangeFile,
    cache: &ObjectCache,
    affected: &HashMap<i64, Vec<i64>>,
) -> Vec<(i64, WayGeometry)> {
    let in_file_ways: HashSet<i64> = file.ways().map(|way| way.id).collect();
    let mut rebuilt: Vec<(i64, WayGeometry)> = affected
        .iter()
        .filter(|(id, _)| !in_file_ways.contains(*id))
        .filter_map(|(id, refs)| {
            let closed = refs.len() > 2 && refs.first() == refs.last();
            assemble_way(refs, closed, &cache.nodes).map(|geometry| (*id, geometry))
        })
        .collect();
    rebuilt.sort_by_key(|(id, _)| *id);
    rebuilt
}

fn assemble_way(refs: &[i64], closed: bool, nodes: &NodeLocations) -> Option<WayGeometry> {
    let coords: Vec<Coord<f64>> = refs
        .iter()
        .map(|reference| nodes.get(reference).copied())
        .collect::<Option<Vec<_>>>()?;
    if coords.len() < 2 {
        return None;
    }
    if closed {
        Some(WayGeometry::Polygon(Polygon::new(
            LineString::from(coords),
            vec![],
        )))
    } else {
        Some(WayGeometry::Line(LineString::from(coords)))
    }
}

fn member_way_coords(
    member: &RelationMember,
    cache: &ObjectCache,
) -> Result<Vec<Coord<f64>>, &'static str> {
    let refs = cache
        .ways
        .get(&member.reference)
        .ok_or("member way unresolved")?;
    refs.iter()
        .map(|reference| cache.nodes.get(reference).copied())
        .collect::<Option<Vec<_>>>()
        .ok_or("member way has unresolved node refs")
}

fn assemble_multilinestring(
    members: &[RelationMember],
    cache: &ObjectCache,
) -> Result<RelationGeometry, &'static str> {
    let mut lines = Vec::new();
    for member in members {
        match member.kind {
            ElementKind::Relation => return Err("relation member of a relation"),
            ElementKind::Node => continue,
            ElementKind::Way => {
                let coords = member_way_coords(member, cache)?;
                if coords.len() < 2 {
                    return Err("member way too short");
                }
                lines.push(LineString::from(coords));
            }
        }
    }
    if lines.is_empty() {
        return Err("no way members");
    }
    Ok(RelationGeometry::MultiLine(MultiLineString(lines)))
}

fn assemble_multipolygon(
    members: &[RelationMember],
    cache: &ObjectCache,
) -> Result<RelationGeometry, &'static str> {
    let mut outer_segments: Vec<Vec<Coord<f64>>> = Vec::new();
    let mut inner_segments: Vec<Vec<Coord<f64>>> = Vec::new();
    for member in members {
        match member.kind {
            ElementKind::Relation => return Err("relation member of a relation"),
            ElementKind::Node => continue,
            ElementKind::Way => {
                let coords = member_way_coords(member, cache)?;
                if coords.len() < 2 {
                    return Err("member way too short");
                }
                if member.role == "inner" {
                    inner_segments.push(coords);
                } else {
                    outer_segments.push(coords);
                }
            }
        }
    }

    let outer_rings = stitch_rings(outer_segments)?;
    if outer_rings.is_empty() {
        return Err("no outer ring");
    }
    let inner_rings = stitch_rings(inner_segments)?;

    let mut polygons: Vec<Polygon<f64>> = outer_rings
        .into_iter()
        .map(|ring| Polygon::new(LineString::from(ring), vec![]))
        .collect();
    for ring in inner_rings {
        let line = LineString::from(ring);
        let start = line
            .points()
            .next()
            .map_or(Point::new(0.0, 0.0), |point| point);
        let target = polygons
            .iter()
            .position(|polygon| polygon.contains(&start))
            .unwrap_or(0);
        if let Some(polygon) = polygons.get_mut(target) {
            polygon.interiors_push(line);
        }
    }
    Ok(RelationGeometry::MultiPolygon(MultiPolygon(polygons)))
}

/// Stitch open way segments into closed rings by shared endpoints.
///
/// Already-closed segments pass through as rings. Remaining segments are
/// chained, reversing where needed, until each chain closes; a chain
/// that exhausts its candidates without closing is a bad geometry.
fn stitch_rings(segments: Vec<Vec<Coord<f64>>>) -> Result<Vec<Vec<Coord<f64>>>, &'static str> {
    let mut rings = Vec::new();
    let mut open: Vec<Vec<Coord<f64>>> = Vec::new();
    for segment in segments {
        if segment.len() > 2 && coords_equal(segment[0], segment[segment.len() - 1]) {
            rings.push(segment);
        } else {
            open.push(segment);
        }
    }

    while let Some(mut chain) = open.pop() {
        loop {
            if chain.len() > 2 && coords_equal(chain[0], chain[chain.len() - 1]) {
                rings.push(chain);
                break;
            }
            let tail = chain[chain.len() - 1];
            let Some(position) = open.iter().position(|candidate| {
                coords_equal(candidate[0], tail)
                    || coords_equal(candidate[candidate.len() - 1], tail)
            }) else {
                return Err("rings do not close");
            };
            let mut next = open.swap_remove(position);
            if coords_equal(next[next.len() - 1], tail) {
                next.reverse();
            }
            // Skip the shared endpoint so the junction is not duplicated.
            chain.extend(next.into_iter().skip(1));
        }
    }
    Ok(rings)
}

fn coords_equal(a: Coord<f64>, b: Coord<f64>) -> bool {
    a.x == b.x && a.y == b.y
}

#[cfg(test)]
mod tests {
    use crate::domain::{Action, ChangeBatch, OsmNode, OsmRelation, OsmWay};

    use super::*;

    fn node(id: i64, lon: f64, lat: f64) -> OsmNode {
        let mut node = OsmNode::new(id, Action::Create);
        node.lon = lon;
        node.lat = lat;
        node
    }

    fn way_with_refs(id: i64, refs: &[i64]) -> OsmWay {
        let mut way = OsmWay::new(id, Action::Create);
        way.refs = refs.to_vec();
        way
    }

    fn square_file() -> OsmChangeFile {
        let mut batch = ChangeBatch::new(Action::Create);
        batch.nodes.push(node(1, 0.0, 0.0));
        batch.nodes.push(node(2, 1.0, 0.0));
        batch.nodes.push(node(3, 1.0, 1.0));
        batch.nodes.push(node(4, 0.0, 1.0));
        batch.ways.push(way_with_refs(100, &[1, 2, 3, 4, 1]));
        OsmChangeFile {
            changes: vec![batch],
        }
    }

    #[test]
    fn in_file_nodes_close_a_polygon() {
        let mut file = square_file();
        let mut cache = ObjectCache::default();
        let failures = build_geometries(&mut file, &mut cache);
        assert!(failures.is_empty());

        let way = &file.changes[0].ways[0];
        let Some(WayGeometry::Polygon(polygon)) = &way.geometry else {
            panic!("expected a polygon, got {:?}", way.geometry);
        };
        let coords: Vec<(f64, f64)> = polygon
            .exterior()
            .coords()
            .map(|coord| (coord.x, coord.y))
            .collect();
        assert_eq!(
            coords,
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]
        );
    }

    #[test]
    fn unresolved_refs_leave_the_way_without_geometry() {
        let mut batch = ChangeBatch::new(Action::Create);
        batch.ways.push(way_with_refs(101, &[7, 8, 9]));
        let mut file = OsmChangeFile {
            changes: vec![batch],
        };
        let mut cache = ObjectCache::default();
        let failures = build_geometries(&mut file, &mut cache);

        assert_eq!(
            failures,
            vec![BadGeometry {
                id: 101,
                kind: ElementKind::Way,
            }]
        );
        assert!(file.changes[0].ways[0].geometry.is_none());
    }

    #[test]
    fn cache_resolves_cross_file_references() {
        let mut batch = ChangeBatch::new(Action::Create);
        batch.ways.push(way_with_refs(102, &[1, 2, 3, 4, 1]));
        let mut file = OsmChangeFile {
            changes: vec![batch],
        };
        let mut cache = ObjectCache::default();
        cache.nodes.insert(1, Coord { x: 0.0, y: 0.0 });
        cache.nodes.insert(2, Coord { x: 1.0, y: 0.0 });
        cache.nodes.insert(3, Coord { x: 1.0, y: 1.0 });
        cache.nodes.insert(4, Coord { x: 0.0, y: 1.0 });

        let failures = build_geometries(&mut file, &mut cache);
        assert!(failures.is_empty());
        assert!(matches!(
            file.changes[0].ways[0].geometry,
            Some(WayGeometry::Polygon(_))
        ));
    }

    #[test]
    fn multipolygon_assigns_inner_rings_to_their_outer() {
        let mut batch = ChangeBatch::new(Action::Create);
        // Outer square 0..4, inner square 1..2 declared as separate ways.
        for (id, lon, lat) in [
            (1, 0.0, 0.0),
            (2, 4.0, 0.0),
            (3, 4.0, 4.0),
            (4, 0.0, 4.0),
            (5, 1.0, 1.0),
            (6, 2.0, 1.0),
            (7, 2.0, 2.0),
            (8, 1.0, 2.0),
        ] {
            batch.nodes.push(node(id, lon, lat));
        }
        batch.ways.push(way_with_refs(200, &[1, 2, 3, 4, 1]));
        batch.ways.push(way_with_refs(201, &[5, 6, 7, 8, 5]));
        let mut relation = OsmRelation::new(300, Action::Create);
        relation
            .tags
            .insert("type".to_owned(), "multipolygon".to_owned());
        relation.members = vec![
            RelationMember {
                kind: ElementKind::Way,
                reference: 200,
                role: "outer".to_owned(),
            },
            RelationMember {
                kind: ElementKind::Way,
                reference: 201,
                role: "inner".to_owned(),
            },
        ];
        batch.relations.push(relation);
        let mut file = OsmChangeFile {
            changes: vec![batch],
        };

        let mut cache = ObjectCache::default();
        let failures = build_geometries(&mut file, &mut cache);
        assert!(failures.is_empty());

        let relation = &file.changes[0].relations[0];
        let Some(RelationGeometry::MultiPolygon(multi)) = &relation.geometry else {
            panic!("expected a multipolygon, got {:?}", relation.geometry);
        };
        assert_eq!(multi.0.len(), 1, "one outer ring");
        assert_eq!(multi.0[0].interiors().len(), 1, "one inner ring");
    }

    #[test]
    fn touching_open_ways_stitch_into_one_ring() {
        let mut batch = ChangeBatch::new(Action::Create);
        for (id, lon, lat) in [(1, 0.0, 0.0), (2, 2.0, 0.0), (3, 2.0, 2.0), (4, 0.0, 2.0)] {
            batch.nodes.push(node(id, lon, lat));
        }
        // Two half-rings sharing endpoints 1 and 3.
        batch.ways.push(way_with_refs(210, &[1, 2, 3]));
        batch.ways.push(way_with_refs(211, &[3, 4, 1]));
        let mut relation = OsmRelation::new(301, Action::Create);
        relation
            .tags
            .insert("type".to_owned(), "multipolygon".to_owned());
        relation.members = vec![
            RelationMember {
                kind: ElementKind::Way,
                reference: 210,
                role: "outer".to_owned(),
            },
            RelationMember {
                kind: ElementKind::Way,
                reference: 211,
                role: "outer".to_owned(),
            },
        ];
        batch.relations.push(relation);
        let mut file = OsmChangeFile {
            changes: vec![batch],
        };

        let mut cache = ObjectCache::default();
        let failures = build_geometries(&mut file, &mut cache);
        assert!(failures.is_empty());
        let relation = &file.changes[0].relations[0];
        let Some(RelationGeometry::MultiPolygon(multi)) = &relation.geometry else {
            panic!("expected a multipolygon");
        };
        assert_eq!(multi.0.len(), 1);
        // The stitched ring visits all four corners and closes.
        assert_eq!(multi.0[0].exterior().coords().count(), 5);
    }

    #[test]
    fn unclosed_rings_are_refused() {
        let mut batch = ChangeBatch::new(Action::Create);
        for (id, lon, lat) in [(1, 0.0, 0.0), (2, 2.0, 0.0), (3, 2.0, 2.0)] {
            batch.nodes.push(node(id, lon, lat));
        }
        batch.ways.push(way_with_refs(220, &[1, 2, 3]));
        let mut relation = OsmRelation::new(302, Action::Create);
        relation
            .tags
            .insert("type".to_owned(), "multipolygon".to_owned());
        relation.members = vec![RelationMember {
            kind: ElementKind::Way,
            reference: 220,
            role: "outer".to_owned(),
        }];
        batch.relations.push(relation);
        let mut file = OsmChangeFile {
            changes: vec![batch],
        };

        let mut cache = ObjectCache::default();
        let failures = build_geometries(&mut file, &mut cache);
        assert_eq!(
            failures,
            vec![BadGeometry {
                id: 302,
                kind: ElementKind::Relation,
            }]
        );
    }

    #[test]
    fn relations_of_relations_are_refused() {
        let mut batch = ChangeBatch::new(Action::Create);
        let mut relation = OsmRelation::new(303, Action::Create);
        relation
            .tags
            .insert("type".to_owned(), "multipolygon".to_owned());
        relation.members = vec![RelationMember {
            kind: ElementKind::Relation,
            reference: 999,
            role: "outer".to_owned(),
        }];
        batch.relations.push(relation);
        let mut file = OsmChangeFile {
            changes: vec![batch],
        };

        let mut cache = ObjectCache::default();
        let failures = build_geometries(&mut file, &mut cache);
        assert_eq!(failures.len(), 1);
        assert!(file.changes[0].relations[0].geometry.is_none());
    }

    #[test]
    fn modified_nodes_rebuild_ways_from_the_database() {
        // The file only modifies node 3; way 400 lives in the database.
        let mut batch = ChangeBatch::new(Action::Modify);
        batch.nodes.push(node(3, 1.5, 1.5));
        let mut file = OsmChangeFile {
            changes: vec![batch],
        };
        let mut cache = ObjectCache::default();
        cache.nodes.insert(1, Coord { x: 0.0, y: 0.0 });
        cache.nodes.insert(2, Coord { x: 1.0, y: 0.0 });
        cache.nodes.insert(4, Coord { x: 0.0, y: 1.0 });
        build_geometries(&mut file, &mut cache);

        let affected = HashMap::from([(400_i64, vec![1, 2, 3, 4, 1])]);
        let rebuilt = rebuild_affected_ways(&file, &cache, &affected);
        assert_eq!(rebuilt.len(), 1);
        let (id, WayGeometry::Polygon(polygon)) = &rebuilt[0] else {
            panic!("expected a rebuilt polygon");
        };
        assert_eq!(*id, 400);
        let modified = polygon
            .exterior()
            .coords()
            .any(|coord| coord.x == 1.5 && coord.y == 1.5);
        assert!(modified, "rebuilt geometry uses the modified coordinate");
    }

    #[test]
    fn missing_references_excludes_in_file_definitions() {
        let mut batch = ChangeBatch::new(Action::Create);
        batch.nodes.push(node(1, 0.0, 0.0));
        batch.ways.push(way_with_refs(100, &[1, 2]));
        let mut relation = OsmRelation::new(300, Action::Create);
        relation.members = vec![
            RelationMember {
                kind: ElementKind::Way,
                reference: 100,
                role: String::new(),
            },
            RelationMember {
                kind: ElementKind::Way,
                reference: 555,
                role: String::new(),
            },
        ];
        batch.relations.push(relation);
        let file = OsmChangeFile {
            changes: vec![batch],
        };

        let missing = missing_references(&file);
        assert_eq!(missing.nodes, vec![2]);
        assert_eq!(missing.ways, vec![555]);
    }
}
