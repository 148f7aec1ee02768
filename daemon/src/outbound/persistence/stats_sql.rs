//! SQL emission for changeset metadata and per-user statistics.
//!
//! Emitters return SQL text; the driver batches fragments per round and
//! applies them in one transaction. Every statement is an upsert so
//! re-processing an already-applied file converges to zero net changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use geo_types::Polygon;

use crate::domain::{ChangeSet, ChangeStats};
use crate::outbound::persistence::escape_literal;

fn simple_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn polygon_wkt(polygon: &Polygon<f64>) -> String {
    let ring = polygon
        .exterior()
        .coords()
        .map(|coord| format!("{} {}", coord.x, coord.y))
        .collect::<Vec<_>>()
        .join(",");
    format!("POLYGON(({ring}))")
}

fn hstore_literal(counters: &BTreeMap<String, i64>) -> Option<String> {
    let pairs: Vec<String> = counters
        .iter()
        .filter(|(key, count)| !key.is_empty() && **count > 0)
        .map(|(key, count)| format!("ARRAY['{}','{count}']", escape_literal(key)))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(format!("HSTORE(ARRAY[{}])", pairs.join(",")))
    }
}

/// Upsert one changeset's metadata, inserting its user first.
///
/// Degenerate records emit nothing; callers filter them, and the bbox
/// accessor independently refuses them.
#[must_use]
pub fn changeset_upsert(change: &ChangeSet) -> String {
    let Some(bbox) = change.bbox_polygon() else {
        return String::new();
    };
    let mut sql = format!(
        "INSERT INTO users VALUES({}, '{}') ON CONFLICT DO NOTHING;",
        change.uid,
        escape_literal(&change.user)
    );

    let created_at = change.created_at.map(simple_timestamp).unwrap_or_default();
    let bbox_expr = format!(
        "ST_Multi(ST_GeomFromEWKT('SRID=4326;{}'))",
        polygon_wkt(&bbox)
    );

    let mut columns = String::from("id, editor, user_id, created_at");
    let mut values = format!(
        "{}, '{}', {}, '{created_at}'",
        change.id,
        escape_literal(&change.editor),
        change.uid
    );
    if !change.hashtags.is_empty() {
        let tags = change
            .hashtags
            .iter()
            .map(|tag| format!("\"{}\"", escape_literal(&tag.replace('"', "&quot;"))))
            .collect::<Vec<_>>()
            .join(", ");
        columns.push_str(", hashtags");
        values.push_str(&format!(", '{{ {tags} }}'"));
    }
    if !change.source.is_empty() {
        columns.push_str(", source");
        values.push_str(&format!(", '{}'", escape_literal(&change.source)));
    }
    columns.push_str(", bbox");
    values.push_str(&format!(", {bbox_expr}"));

    sql.push_str(&format!(
        "INSERT INTO changesets ({columns}) VALUES({values}) \
         ON CONFLICT (id) DO UPDATE SET editor='{}', created_at='{created_at}', bbox={bbox_expr};",
        escape_literal(&change.editor)
    ));
    sql
}

/// Upsert per-change statistics, keyed on change id.
///
/// `added` and `modified` are independent hstore columns; a change that
/// carries both kinds of counters writes both in the one statement.
#[must_use]
pub fn stats_upsert(stats: &ChangeStats, now: DateTime<Utc>) -> String {
    let closed_at = stats
        .closed_at
        .or(stats.created_at)
        .map(simple_timestamp)
        .unwrap_or_else(|| simple_timestamp(now));
    let updated_at = simple_timestamp(now);

    let counters: Vec<(&str, String)> = [
        ("added", hstore_literal(&stats.added)),
        ("modified", hstore_literal(&stats.modified)),
    ]
    .into_iter()
    .filter_map(|(column, store)| store.map(|store| (column, store)))
    .collect();

    if counters.is_empty() {
        return format!(
            "INSERT INTO changesets (id, user_id, updated_at) \
             VALUES({}, {}, '{updated_at}') \
             ON CONFLICT (id) DO UPDATE SET closed_at = '{closed_at}', \
             updated_at = '{updated_at}';",
            stats.change_id, stats.user_id
        );
    }

    let columns = counters
        .iter()
        .map(|(column, _)| *column)
        .collect::<Vec<_>>()
        .join(", ");
    let values = counters
        .iter()
        .map(|(_, store)| store.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let updates = counters
        .iter()
        .map(|(column, store)| format!("{column} = {store}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO changesets (id, user_id, closed_at, updated_at, {columns}) \
         VALUES({}, {}, '{closed_at}', '{updated_at}', {values}) \
         ON CONFLICT (id) DO UPDATE SET {updates}, \
         closed_at = '{closed_at}', updated_at = '{updated_at}';",
        stats.change_id, stats.user_id
    )
}
