//! SQL emission for the `validation` table.

use crate::domain::{ValidationFlag, ValidationStatus};

fn status_array(status: &ValidationStatus) -> String {
    let flags = status
        .flags
        .iter()
        .map(|flag| format!("'{}'", flag.as_str()))
        .collect::<Vec<_>>()
        .join(",");
    format!("ARRAY[{flags}]::status[]")
}

/// Upsert one feature's validation result, replacing the status array.
#[must_use]
pub fn status_upsert(status: &ValidationStatus) -> String {
    let array = status_array(status);
    let timestamp = status
        .timestamp
        .map_or_else(|| "now()".to_owned(), |ts| {
            format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S"))
        });
    let location = status.center.map_or_else(
        || "NULL".to_owned(),
        |center| {
            format!(
                "ST_GeomFromText('POINT({} {})', 4326)",
                center.x(),
                center.y()
            )
        },
    );
    format!(
        "INSERT INTO validation (osm_id, type, user_id, angle, status, timestamp, location) \
         VALUES({}, '{}', {}, {}, {array}, {timestamp}, {location}) \
         ON CONFLICT (osm_id) DO UPDATE SET status = {array}, timestamp = {timestamp};",
        status.osm_id,
        status.kind.as_str(),
        status.user_id,
        status.angle,
    )
}

/// Drop one driver-managed flag the current result does not carry.
#[must_use]
pub fn clear_flag(osm_id: i64, flag: ValidationFlag) -> String {
    format!(
        "UPDATE validation SET status = array_remove(status, '{}') WHERE osm_id={osm_id};",
        flag.as_str()
    )
}

/// Delete validation rows for the given ids; empty input emits nothing.
#[must_use]
pub fn delete_many(ids: &[i64]) -> String {
    if ids.is_empty() {
        return String::new();
    }
    let joined = ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("DELETE FROM validation WHERE osm_id IN ({joined});")
}
