//! SQL emission for the raw geometry tables (`nodes`, `ways`,
//! `relations`).
//!
//! Upserts are keyed on `osm_id`; removals delete. Geometry is written
//! as WKT with SRID 4326, `NULL` when assembly was impossible so the
//! element is still materialized rather than silently dropped.

use geo_types::{LineString, MultiLineString, MultiPolygon, Polygon};

use crate::domain::{Action, OsmNode, OsmRelation, OsmWay, RelationGeometry, Tags, WayGeometry};
use crate::outbound::persistence::escape_literal;

fn coords_wkt(line: &LineString<f64>) -> String {
    line.coords()
        .map(|coord| format!("{} {}", coord.x, coord.y))
        .collect::<Vec<_>>()
        .join(",")
}

fn polygon_rings_wkt(polygon: &Polygon<f64>) -> String {
    let mut rings = vec![format!("({})", coords_wkt(polygon.exterior()))];
    rings.extend(
        polygon
            .interiors()
            .iter()
            .map(|ring| format!("({})", coords_wkt(ring))),
    );
    rings.join(",")
}

/// WKT of an assembled way geometry.
#[must_use]
pub fn way_wkt(geometry: &WayGeometry) -> String {
    match geometry {
        WayGeometry::Polygon(polygon) => format!("POLYGON({})", polygon_rings_wkt(polygon)),
        WayGeometry::Line(line) => format!("LINESTRING({})", coords_wkt(line)),
    }
}

fn multipolygon_wkt(multi: &MultiPolygon<f64>) -> String {
    let polygons = multi
        .0
        .iter()
        .map(|polygon| format!("({})", polygon_rings_wkt(polygon)))
        .collect::<Vec<_>>()
        .join(",");
    format!("MULTIPOLYGON({polygons})")
}

fn multilinestring_wkt(multi: &MultiLineString<f64>) -> String {
    let lines = multi
        .0
        .iter()
        .map(|line| format!("({})", coords_wkt(line)))
        .collect::<Vec<_>>()
        .join(",");
    format!("MULTILINESTRING({lines})")
}

/// WKT of an assembled relation geometry.
#[must_use]
pub fn relation_wkt(geometry: &RelationGeometry) -> String {
    match geometry {
        RelationGeometry::MultiPolygon(multi) => multipolygon_wkt(multi),
        RelationGeometry::MultiLine(multi) => multilinestring_wkt(multi),
    }
}

fn geom_expr(wkt: Option<String>) -> String {
    match wkt {
        Some(wkt) => format!("ST_GeomFromText('{wkt}', 4326)"),
        None => "NULL".to_owned(),
    }
}

fn tags_expr(tags: &Tags) -> String {
    if tags.is_empty() {
        return "NULL".to_owned();
    }
    let pairs = tags
        .iter()
        .map(|(key, value)| {
            format!(
                "ARRAY['{}','{}']",
                escape_literal(key),
                escape_literal(value)
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("HSTORE(ARRAY[{pairs}])")
}

fn refs_expr(refs: &[i64]) -> String {
    if refs.is_empty() {
        return "NULL".to_owned();
    }
    let joined = refs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("ARRAY[{joined}]::bigint[]")
}

fn timestamp_expr(meta: &crate::domain::ElementMeta) -> String {
    meta.timestamp
        .map_or_else(|| "now()".to_owned(), |ts| {
            format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S"))
        })
}

/// Upsert or delete one node.
#[must_use]
pub fn node_change(node: &OsmNode) -> String {
    if node.action == Action::Remove {
        return format!("DELETE FROM nodes WHERE osm_id={};", node.id);
    }
    let geom = geom_expr(Some(format!("POINT({} {})", node.lon, node.lat)));
    let tags = tags_expr(&node.tags);
    format!(
        "INSERT INTO nodes (osm_id, geom, tags, timestamp, version, \"user\", uid, changeset) \
         VALUES({}, {geom}, {tags}, {}, {}, '{}', {}, {}) \
         ON CONFLICT (osm_id) DO UPDATE SET geom = {geom}, tags = {tags}, \
         timestamp = {}, version = {}, changeset = {};",
        node.id,
        timestamp_expr(&node.meta),
        node.meta.version,
        escape_literal(&node.meta.user),
        node.meta.uid,
        node.meta.changeset,
        timestamp_expr(&node.meta),
        node.meta.version,
        node.meta.changeset,
    )
}

/// Upsert or delete one way.
#[must_use]
pub fn way_change(way: &OsmWay) -> String {
    if way.action == Action::Remove {
        return format!("DELETE FROM ways WHERE osm_id={};", way.id);
    }
    let geom = geom_expr(way.geometry.as_ref().map(way_wkt));
    let tags = tags_expr(&way.tags);
    let refs = refs_expr(&way.refs);
    format!(
        "INSERT INTO ways (osm_id, geom, tags, refs, timestamp, version, \"user\", uid, changeset) \
         VALUES({}, {geom}, {tags}, {refs}, {}, {}, '{}', {}, {}) \
         ON CONFLICT (osm_id) DO UPDATE SET geom = {geom}, tags = {tags}, refs = {refs}, \
         timestamp = {}, version = {}, changeset = {};",
        way.id,
        timestamp_expr(&way.meta),
        way.meta.version,
        escape_literal(&way.meta.user),
        way.meta.uid,
        way.meta.changeset,
        timestamp_expr(&way.meta),
        way.meta.version,
        way.meta.changeset,
    )
}

/// Upsert or delete one relation.
#[must_use]
pub fn relation_change(relation: &OsmRelation) -> String {
    if relation.action == Action::Remove {
        return format!("DELETE FROM relations WHERE osm_id={};", relation.id);
    }
    let geom = geom_expr(relation.geometry.as_ref().map(relation_wkt));
    let tags = tags_expr(&relation.tags);
    let member_refs: Vec<i64> = relation
        .members
        .iter()
        .map(|member| member.reference)
        .collect();
    let refs = refs_expr(&member_refs);
    format!(
        "INSERT INTO relations (osm_id, geom, tags, refs, timestamp, version, \"user\", uid, changeset) \
         VALUES({}, {geom}, {tags}, {refs}, {}, {}, '{}', {}, {}) \
         ON CONFLICT (osm_id) DO UPDATE SET geom = {geom}, tags = {tags}, refs = {refs}, \
         timestamp = {}, version = {}, changeset = {};",
        relation.id,
        timestamp_expr(&relation.meta),
        relation.meta.version,
        escape_literal(&relation.meta.user),
        relation.meta.uid,
        relation.meta.changeset,
        timestamp_expr(&relation.meta),
        relation.meta.version,
        relation.meta.changeset,
    )
}

/// Refresh only the stored geometry of a way rebuilt after one of its
/// nodes moved.
#[must_use]
pub fn way_geometry_update(id: i64, geometry: &WayGeometry) -> String {
    format!(
        "UPDATE ways SET geom = ST_GeomFromText('{}', 4326) WHERE osm_id={id};",
        way_wkt(geometry)
    )
}

#[cfg(test)]
mod tests {
    use geo_types::{Coord, LineString, Polygon};

    use super::*;

    fn square() -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 1.0, y: 0.0 },
                Coord { x: 1.0, y: 1.0 },
                Coord { x: 0.0, y: 1.0 },
                Coord { x: 0.0, y: 0.0 },
            ]),
            vec![],
        )
    }

    #[test]
    fn removal_deletes_by_osm_id() {
        let node = OsmNode::new(42, Action::Remove);
        assert_eq!(node_change(&node), "DELETE FROM nodes WHERE osm_id=42;");
        let way = OsmWay::new(43, Action::Remove);
        assert_eq!(way_change(&way), "DELETE FROM ways WHERE osm_id=43;");
    }

    #[test]
    fn node_upsert_carries_point_geometry() {
        let mut node = OsmNode::new(42, Action::Create);
        node.lon = 21.7260014;
        node.lat = 4.6204295;
        node.meta.user = "mapper".to_owned();
        let sql = node_change(&node);
        assert!(sql.contains("ST_GeomFromText('POINT(21.7260014 4.6204295)', 4326)"));
        assert!(sql.contains("ON CONFLICT (osm_id) DO UPDATE"));
    }

    #[test]
    fn way_without_geometry_is_still_materialized() {
        let mut way = OsmWay::new(101, Action::Create);
        way.refs = vec![1, 2, 3];
        way.tags.insert("building".to_owned(), "yes".to_owned());
        let sql = way_change(&way);
        assert!(sql.contains("INSERT INTO ways"));
        assert!(sql.contains("NULL"));
        assert!(sql.contains("ARRAY[1,2,3]::bigint[]"));
    }

    #[test]
    fn polygon_way_renders_closed_wkt() {
        let wkt = way_wkt(&WayGeometry::Polygon(square()));
        assert_eq!(wkt, "POLYGON((0 0,1 0,1 1,0 1,0 0))");
    }

    #[test]
    fn multipolygon_keeps_inner_rings() {
        let mut polygon = square();
        polygon.interiors_push(LineString::from(vec![
            Coord { x: 0.25, y: 0.25 },
            Coord { x: 0.75, y: 0.25 },
            Coord { x: 0.75, y: 0.75 },
            Coord { x: 0.25, y: 0.75 },
            Coord { x: 0.25, y: 0.25 },
        ]));
        let wkt = relation_wkt(&RelationGeometry::MultiPolygon(geo_types::MultiPolygon(
            vec![polygon],
        )));
        assert!(wkt.starts_with("MULTIPOLYGON((("));
        assert!(wkt.contains("),(0.25 0.25"));
    }

    #[test]
    fn geometry_update_touches_only_geom() {
        let sql = way_geometry_update(7, &WayGeometry::Polygon(square()));
        assert_eq!(
            sql,
            "UPDATE ways SET geom = ST_GeomFromText('POLYGON((0 0,1 0,1 1,0 1,0 0))', 4326) WHERE osm_id=7;"
        );
    }
}
