//! End-to-end geometry scenarios: parsed change files through the
//! builder, with the object cache standing in for the database.

use std::collections::HashMap;

use geo_types::Coord;
use pathwatch::domain::{
    ObjectCache, RelationGeometry, StatsCategories, WayGeometry, build_geometries, collect_stats,
    rebuild_affected_ways,
};
use pathwatch::parse::read_osmchange_xml;

const SQUARE: [(f64, f64); 4] = [
    (21.7260014, 4.6204295),
    (21.7260865, 4.6204274),
    (21.7260849, 4.6203649),
    (21.7259998, 4.620367),
];

fn create_nodes_xml() -> String {
    let nodes: String = SQUARE
        .iter()
        .enumerate()
        .map(|(index, (lon, lat))| {
            format!(
                r#"<node id="{}" version="1" timestamp="2021-03-01T10:00:0{}Z" uid="7" user="mapper" changeset="900" lat="{lat}" lon="{lon}"/>"#,
                index + 1,
                index
            )
        })
        .collect();
    format!(r#"<osmChange version="0.6"><create>{nodes}</create></osmChange>"#)
}

fn create_way_xml(way_id: i64) -> String {
    format!(
        r#"<osmChange version="0.6"><create>
      <way id="{way_id}" version="1" timestamp="2021-03-01T10:01:00Z" uid="7" user="mapper" changeset="900">
        <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="4"/><nd ref="1"/>
        <tag k="building" v="yes"/>
      </way>
    </create></osmChange>"#
    )
}

fn polygon_coords(geometry: &WayGeometry) -> Vec<(f64, f64)> {
    let WayGeometry::Polygon(polygon) = geometry else {
        panic!("expected a polygon, got {geometry:?}");
    };
    polygon
        .exterior()
        .coords()
        .map(|coord| (coord.x, coord.y))
        .collect()
}

fn expected_square_ring() -> Vec<(f64, f64)> {
    let mut ring: Vec<(f64, f64)> = SQUARE.to_vec();
    ring.push(SQUARE[0]);
    ring
}

// S1: nodes and the way that references them arrive in one file.
#[test]
fn way_created_with_its_nodes_closes_the_declared_polygon() {
    let xml = format!(
        r#"<osmChange version="0.6"><create>
      <node id="1" version="1" uid="7" user="m" changeset="900" lat="4.6204295" lon="21.7260014"/>
      <node id="2" version="1" uid="7" user="m" changeset="900" lat="4.6204274" lon="21.7260865"/>
      <node id="3" version="1" uid="7" user="m" changeset="900" lat="4.6203649" lon="21.7260849"/>
      <node id="4" version="1" uid="7" user="m" changeset="900" lat="4.620367" lon="21.7259998"/>
      <way id="101874" version="1" uid="7" user="m" changeset="900">
        <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="4"/><nd ref="1"/>
      </way>
    </create></osmChange>"#
    );
    let mut file = read_osmchange_xml(xml.as_bytes()).expect("valid osmChange");
    let mut cache = ObjectCache::default();
    let failures = build_geometries(&mut file, &mut cache);
    assert!(failures.is_empty());

    let way = &file.changes[0].ways[0];
    assert_eq!(
        polygon_coords(way.geometry.as_ref().expect("geometry assembled")),
        expected_square_ring()
    );
}

// S2: the nodes arrived in an earlier file; only the cache knows them.
#[test]
fn way_created_against_cached_nodes_matches_the_same_polygon() {
    let mut first = read_osmchange_xml(create_nodes_xml().as_bytes()).expect("nodes file");
    let mut cache = ObjectCache::default();
    build_geometries(&mut first, &mut cache);

    let mut second = read_osmchange_xml(create_way_xml(101_875).as_bytes()).expect("way file");
    let failures = build_geometries(&mut second, &mut cache);
    assert!(failures.is_empty());

    let way = &second.changes[0].ways[0];
    assert_eq!(
        polygon_coords(way.geometry.as_ref().expect("geometry assembled")),
        expected_square_ring()
    );
}

// S3: a later file moves one node; ways referencing it pick up the new
// coordinate and the user's modified counter increments.
#[test]
fn modified_node_updates_referencing_ways_and_counts_as_modified() {
    let moved = (21.7260114, 4.6204395);
    let xml = format!(
        r#"<osmChange version="0.6"><modify>
      <node id="1" version="2" timestamp="2021-03-02T09:00:00Z" uid="7" user="mapper" changeset="901" lat="{}" lon="{}">
        <tag k="building" v="yes"/>
      </node>
    </modify></osmChange>"#,
        moved.1, moved.0
    );
    let mut file = read_osmchange_xml(xml.as_bytes()).expect("modify file");

    let mut cache = ObjectCache::default();
    for (index, (lon, lat)) in SQUARE.iter().enumerate() {
        let id = i64::try_from(index).expect("small index") + 1;
        cache.nodes.insert(id, Coord { x: *lon, y: *lat });
    }
    build_geometries(&mut file, &mut cache);

    let affected = HashMap::from([(101_875_i64, vec![1, 2, 3, 4, 1])]);
    let rebuilt = rebuild_affected_ways(&file, &cache, &affected);
    assert_eq!(rebuilt.len(), 1);
    let coords = polygon_coords(&rebuilt[0].1);
    assert_eq!(coords[0], moved, "polygon starts at the moved coordinate");

    for batch in &mut file.changes {
        for node in &mut batch.nodes {
            node.priority = true;
        }
    }
    let stats = collect_stats(&file, &StatsCategories::default());
    let record = stats.get(&901).expect("change recorded");
    assert_eq!(record.modified.get("building"), Some(&1));
}

// S4: a multipolygon relation with an outer and an inner way.
#[test]
fn relation_of_two_ways_produces_one_outer_and_one_inner_ring() {
    let xml = r#"<osmChange version="0.6"><create>
      <node id="1" version="1" uid="7" user="m" changeset="900" lat="0.0" lon="0.0"/>
      <node id="2" version="1" uid="7" user="m" changeset="900" lat="0.0" lon="4.0"/>
      <node id="3" version="1" uid="7" user="m" changeset="900" lat="4.0" lon="4.0"/>
      <node id="4" version="1" uid="7" user="m" changeset="900" lat="4.0" lon="0.0"/>
      <node id="5" version="1" uid="7" user="m" changeset="900" lat="1.0" lon="1.0"/>
      <node id="6" version="1" uid="7" user="m" changeset="900" lat="1.0" lon="2.0"/>
      <node id="7" version="1" uid="7" user="m" changeset="900" lat="2.0" lon="2.0"/>
      <node id="8" version="1" uid="7" user="m" changeset="900" lat="2.0" lon="1.0"/>
      <way id="1001" version="1" uid="7" user="m" changeset="900">
        <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="4"/><nd ref="1"/>
      </way>
      <way id="1002" version="1" uid="7" user="m" changeset="900">
        <nd ref="5"/><nd ref="6"/><nd ref="7"/><nd ref="8"/><nd ref="5"/>
      </way>
      <relation id="211766" version="1" uid="7" user="m" changeset="900">
        <member type="way" ref="1001" role="outer"/>
        <member type="way" ref="1002" role="inner"/>
        <tag k="type" v="multipolygon"/>
      </relation>
    </create></osmChange>"#;
    let mut file = read_osmchange_xml(xml.as_bytes()).expect("relation file");
    let mut cache = ObjectCache::default();
    let failures = build_geometries(&mut file, &mut cache);
    assert!(failures.is_empty());

    let relation = &file.changes[0].relations[0];
    let Some(RelationGeometry::MultiPolygon(multi)) = &relation.geometry else {
        panic!("expected a multipolygon, got {:?}", relation.geometry);
    };
    assert_eq!(multi.0.len(), 1, "exactly one outer ring");
    assert_eq!(multi.0[0].interiors().len(), 1, "exactly one inner ring");
}

// Correctness property: stored vertices come only from resolvable refs,
// in declared order.
#[test]
fn assembled_vertices_equal_the_ordered_ref_resolution() {
    let mut first = read_osmchange_xml(create_nodes_xml().as_bytes()).expect("nodes file");
    let mut cache = ObjectCache::default();
    build_geometries(&mut first, &mut cache);

    let mut second = read_osmchange_xml(create_way_xml(7_000).as_bytes()).expect("way file");
    build_geometries(&mut second, &mut cache);

    let way = &second.changes[0].ways[0];
    let resolved: Vec<(f64, f64)> = way
        .refs
        .iter()
        .map(|reference| {
            let coord = cache.nodes.get(reference).expect("ref resolvable");
            (coord.x, coord.y)
        })
        .collect();
    assert_eq!(
        polygon_coords(way.geometry.as_ref().expect("geometry assembled")),
        resolved
    );
}
