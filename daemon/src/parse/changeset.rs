//! Event-driven reader for changeset replication documents.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::domain::{ChangeSet, ChangeSetFile, Error};
use crate::parse::osmchange::{AttributeExt, map_attr_err, parse_f64, parse_i64, parse_timestamp};

/// Parse a decompressed changeset dump.
///
/// Records without `closed_at` are treated as still open; historic dumps
/// drop the attribute entirely.
///
/// # Errors
///
/// Returns a decode error on malformed XML or attribute values.
pub fn read_changeset_xml(xml: &[u8]) -> Result<ChangeSetFile, Error> {
    let text = std::str::from_utf8(xml)
        .map_err(|err| Error::decode(format!("changeset dump is not UTF-8: {err}")))?;
    let mut reader = Reader::from_str(text);
    let mut file = ChangeSetFile::default();
    let mut current: Option<ChangeSet> = None;

    loop {
        match reader
            .read_event()
            .map_err(|err| Error::decode(format!("bad changeset XML: {err}")))?
        {
            Event::Start(start) => match start.name().as_ref() {
                b"changeset" => current = Some(parse_changeset(&start)?),
                b"tag" => {
                    if let Some(change) = current.as_mut() {
                        apply_tag(change, &start)?;
                    }
                }
                _ => {}
            },
            Event::Empty(start) => match start.name().as_ref() {
                b"changeset" => {
                    let change = parse_changeset(&start)?;
                    finish(&mut file, change);
                }
                b"tag" => {
                    if let Some(change) = current.as_mut() {
                        apply_tag(change, &start)?;
                    }
                }
                _ => {}
            },
            Event::End(end) => {
                if end.name().as_ref() == b"changeset"
                    && let Some(change) = current.take()
                {
                    finish(&mut file, change);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(file)
}

fn finish(file: &mut ChangeSetFile, change: ChangeSet) {
    if let Some(closed_at) = change.closed_at
        && file.last_closed_at.is_none_or(|latest| closed_at > latest)
    {
        file.last_closed_at = Some(closed_at);
    }
    file.changes.push(change);
}

fn parse_changeset(start: &BytesStart<'_>) -> Result<ChangeSet, Error> {
    let mut change = ChangeSet::new(0);
    for attribute in start.attributes() {
        let attribute = map_attr_err(attribute)?;
        let value = attribute.unescape_value_text()?;
        match attribute.key.as_ref() {
            b"id" => change.id = parse_i64(&value)?,
            b"uid" => change.uid = parse_i64(&value)?,
            b"user" => change.user = value.into_owned(),
            b"created_at" => change.created_at = Some(parse_timestamp(&value)?),
            b"closed_at" => change.closed_at = Some(parse_timestamp(&value)?),
            b"open" => change.open = value.as_ref() == "true",
            b"num_changes" => change.num_changes = parse_i64(&value)?,
            b"min_lat" => change.min_lat = parse_f64(&value)?,
            b"min_lon" => change.min_lon = parse_f64(&value)?,
            b"max_lat" => change.max_lat = parse_f64(&value)?,
            b"max_lon" => change.max_lon = parse_f64(&value)?,
            _ => {}
        }
    }
    if change.closed_at.is_none() {
        change.open = true;
    }
    Ok(change)
}

fn apply_tag(change: &mut ChangeSet, start: &BytesStart<'_>) -> Result<(), Error> {
    let mut key = String::new();
    let mut value = String::new();
    for attribute in start.attributes() {
        let attribute = map_attr_err(attribute)?;
        let text = attribute.unescape_value_text()?;
        match attribute.key.as_ref() {
            b"k" => key = text.into_owned(),
            b"v" => value = text.into_owned(),
            _ => {}
        }
    }
    match key.as_str() {
        "created_by" => change.editor = value,
        "source" => change.source = value,
        "hashtags" => {
            change
                .hashtags
                .extend(value.split(';').filter(|tag| !tag.is_empty()).map(|tag| {
                    let tag = tag.trim();
                    tag.strip_prefix('#').unwrap_or(tag).to_owned()
                }));
        }
        "comment" => {
            // Campaign hashtags often only appear in the free-form comment.
            change.hashtags.extend(
                value
                    .split_whitespace()
                    .filter_map(|word| word.strip_prefix('#'))
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_owned),
            );
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="planet-dump-ng">
  <changeset id="91000001" created_at="2020-10-08T21:00:00Z" closed_at="2020-10-08T21:30:00Z" open="false" user="mapper" uid="7" min_lat="52.1" min_lon="13.1" max_lat="52.2" max_lon="13.2" num_changes="12" comments_count="0">
    <tag k="created_by" v="JOSM/1.5 (17084 en)"/>
    <tag k="comment" v="Adding buildings #hotosm-project-9 #missingmaps"/>
    <tag k="source" v="Bing"/>
  </changeset>
  <changeset id="91000002" created_at="2020-10-08T22:00:00Z" open="true" user="slowpoke" uid="8" min_lat="1.0" min_lon="1.0" max_lat="1.1" max_lon="1.1" num_changes="2" comments_count="0">
    <tag k="hashtags" v="#osmgeoweek;#mapathon"/>
  </changeset>
</osm>
"##;

    #[test]
    fn records_parse_with_metadata() {
        let file = read_changeset_xml(SAMPLE.as_bytes()).expect("valid dump");
        assert_eq!(file.changes.len(), 2);
        let first = &file.changes[0];
        assert_eq!(first.id, 91_000_001);
        assert_eq!(first.editor, "JOSM/1.5 (17084 en)");
        assert_eq!(first.source, "Bing");
        assert_eq!(first.hashtags, vec!["hotosm-project-9", "missingmaps"]);
        assert!(!first.open);
    }

    #[test]
    fn absent_closed_at_means_still_open() {
        let file = read_changeset_xml(SAMPLE.as_bytes()).expect("valid dump");
        let second = &file.changes[1];
        assert!(second.open);
        assert!(second.closed_at.is_none());
        assert_eq!(second.hashtags, vec!["osmgeoweek", "mapathon"]);
    }

    #[test]
    fn last_closed_at_tracks_the_newest_close() {
        let file = read_changeset_xml(SAMPLE.as_bytes()).expect("valid dump");
        assert_eq!(
            file.last_closed_at,
            Some(parse_timestamp("2020-10-08T21:30:00Z").expect("fixture timestamp"))
        );
        assert_eq!(file.latest_timestamp(), file.last_closed_at);
    }
}
