//! Law-style properties of the priority polygon filter.

use pathwatch::domain::{Action, ChangeBatch, NodeLocations, OsmChangeFile, OsmNode, PriorityArea};

const UNIT_SQUARE_GEOJSON: &str =
    r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,1.0],[0.0,0.0]]]}"#;

fn node_at(id: i64, lon: f64, lat: f64) -> OsmNode {
    let mut node = OsmNode::new(id, Action::Create);
    node.lon = lon;
    node.lat = lat;
    node
}

fn grid_nodes() -> Vec<OsmNode> {
    let mut nodes = Vec::new();
    let mut id = 0;
    for step_x in 0..10 {
        for step_y in 0..10 {
            id += 1;
            nodes.push(node_at(
                id,
                f64::from(step_x) * 0.3 - 0.5,
                f64::from(step_y) * 0.3 - 0.5,
            ));
        }
    }
    nodes
}

// Filter-then-count equals count-then-filter for polygon membership.
#[test]
fn filtering_and_counting_commute_for_nodes() {
    let area = PriorityArea::from_geojson_str(UNIT_SQUARE_GEOJSON).expect("valid area");
    let nodes = grid_nodes();

    // Count first: membership decided node by node.
    let counted_first = nodes
        .iter()
        .filter(|node| area.contains_point(node.lon, node.lat))
        .count();

    // Filter first: run the batch filter, then count priority flags.
    let mut file = OsmChangeFile {
        changes: vec![ChangeBatch {
            action: Some(Action::Create),
            nodes,
            ..ChangeBatch::default()
        }],
    };
    area.filter_changes(&mut file, &NodeLocations::new());
    let filtered_first = file.nodes().filter(|node| node.priority).count();

    assert_eq!(counted_first, filtered_first);
    assert!(counted_first > 0, "the grid overlaps the square");
    assert!(
        filtered_first < file.nodes().count(),
        "the grid extends beyond the square"
    );
}

// An unbounded area is the identity filter.
#[test]
fn unbounded_area_marks_everything_priority() {
    let area = PriorityArea::everywhere();
    let mut file = OsmChangeFile {
        changes: vec![ChangeBatch {
            action: Some(Action::Create),
            nodes: grid_nodes(),
            ..ChangeBatch::default()
        }],
    };
    area.filter_changes(&mut file, &NodeLocations::new());
    assert!(file.nodes().all(|node| node.priority));
}
