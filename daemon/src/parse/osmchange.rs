//! Event-driven reader for osmChange documents.
//!
//! An osmChange file groups elements under `<create>`, `<modify>` and
//! `<delete>` blocks; every element inside a block shares that action.
//! Deleted elements frequently arrive as bare ids.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::domain::{
    Action, ChangeBatch, ElementKind, ElementMeta, Error, OsmChangeFile, OsmNode, OsmRelation,
    OsmWay, RelationMember,
};

/// Parse a decompressed osmChange document.
///
/// # Errors
///
/// Returns a decode error on malformed XML or attribute values; absent
/// optional attributes are tolerated.
pub fn read_osmchange_xml(xml: &[u8]) -> Result<OsmChangeFile, Error> {
    let text = std::str::from_utf8(xml)
        .map_err(|err| Error::decode(format!("osmChange is not UTF-8: {err}")))?;
    let mut reader = Reader::from_str(text);
    let mut file = OsmChangeFile::default();
    let mut batch: Option<ChangeBatch> = None;
    let mut current: Option<Current> = None;

    loop {
        match reader
            .read_event()
            .map_err(|err| Error::decode(format!("bad osmChange XML: {err}")))?
        {
            Event::Start(start) => {
                handle_open(&start, &mut file, &mut batch, &mut current, false)?;
            }
            Event::Empty(start) => {
                handle_open(&start, &mut file, &mut batch, &mut current, true)?;
            }
            Event::End(end) => match end.name().as_ref() {
                b"create" | b"modify" | b"delete" => {
                    if let Some(finished) = batch.take() {
                        file.changes.push(finished);
                    }
                }
                b"node" | b"way" | b"relation" => {
                    close_element(&mut batch, &mut current);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(file)
}

/// The element currently collecting children.
enum Current {
    Node(OsmNode),
    Way(OsmWay),
    Relation(OsmRelation),
}

fn handle_open(
    start: &BytesStart<'_>,
    file: &mut OsmChangeFile,
    batch: &mut Option<ChangeBatch>,
    current: &mut Option<Current>,
    self_closing: bool,
) -> Result<(), Error> {
    match start.name().as_ref() {
        b"create" => open_batch(file, batch, Action::Create, self_closing),
        b"modify" => open_batch(file, batch, Action::Modify, self_closing),
        b"delete" => open_batch(file, batch, Action::Remove, self_closing),
        b"node" => {
            let action = batch_action(batch)?;
            let node = parse_node(start, action)?;
            *current = Some(Current::Node(node));
            if self_closing {
                close_element(batch, current);
            }
        }
        b"way" => {
            let action = batch_action(batch)?;
            let way = parse_way(start, action)?;
            *current = Some(Current::Way(way));
            if self_closing {
                close_element(batch, current);
            }
        }
        b"relation" => {
            let action = batch_action(batch)?;
            let relation = parse_relation(start, action)?;
            *current = Some(Current::Relation(relation));
            if self_closing {
                close_element(batch, current);
            }
        }
        b"nd" => {
            if let Some(Current::Way(way)) = current.as_mut() {
                for attribute in start.attributes() {
                    let attribute = map_attr_err(attribute)?;
                    if attribute.key.as_ref() == b"ref" {
                        way.refs.push(parse_i64(&attribute.unescape_value_text()?)?);
                    }
                }
            }
        }
        b"member" => {
            if let Some(Current::Relation(relation)) = current.as_mut() {
                relation.members.push(parse_member(start)?);
            }
        }
        b"tag" => {
            let (key, value) = parse_tag(start)?;
            match current.as_mut() {
                Some(Current::Node(node)) => {
                    node.tags.insert(key, value);
                }
                Some(Current::Way(way)) => {
                    way.tags.insert(key, value);
                }
                Some(Current::Relation(relation)) => {
                    relation.tags.insert(key, value);
                }
                None => {}
            }
        }
        _ => {}
    }
    Ok(())
}

fn open_batch(
    file: &mut OsmChangeFile,
    batch: &mut Option<ChangeBatch>,
    action: Action,
    self_closing: bool,
) {
    if let Some(finished) = batch.take() {
        // A block opened while another was still pending; the pending
        // one is complete as far as its elements go.
        file.changes.push(finished);
    }
    if self_closing {
        file.changes.push(ChangeBatch::new(action));
    } else {
        *batch = Some(ChangeBatch::new(action));
    }
}

fn batch_action(batch: &Option<ChangeBatch>) -> Result<Action, Error> {
    batch
        .as_ref()
        .and_then(|batch| batch.action)
        .ok_or_else(|| Error::decode("element outside create/modify/delete block"))
}

fn close_element(batch: &mut Option<ChangeBatch>, current: &mut Option<Current>) {
    let Some(batch) = batch.as_mut() else {
        *current = None;
        return;
    };
    match current.take() {
        Some(Current::Node(node)) => batch.nodes.push(node),
        Some(Current::Way(way)) => batch.ways.push(way),
        Some(Current::Relation(relation)) => batch.relations.push(relation),
        None => {}
    }
}

fn parse_node(start: &BytesStart<'_>, action: Action) -> Result<OsmNode, Error> {
    let mut node = OsmNode::new(0, action);
    for attribute in start.attributes() {
        let attribute = map_attr_err(attribute)?;
        let value = attribute.unescape_value_text()?;
        match attribute.key.as_ref() {
            b"id" => node.id = parse_i64(&value)?,
            b"lat" => node.lat = parse_f64(&value)?,
            b"lon" => node.lon = parse_f64(&value)?,
            _ => apply_meta(&mut node.meta, attribute.key.as_ref(), &value)?,
        }
    }
    Ok(node)
}

fn parse_way(start: &BytesStart<'_>, action: Action) -> Result<OsmWay, Error> {
    let mut way = OsmWay::new(0, action);
    for attribute in start.attributes() {
        let attribute = map_attr_err(attribute)?;
        let value = attribute.unescape_value_text()?;
        match attribute.key.as_ref() {
            b"id" => way.id = parse_i64(&value)?,
            _ => apply_meta(&mut way.meta, attribute.key.as_ref(), &value)?,
        }
    }
    Ok(way)
}

fn parse_relation(start: &BytesStart<'_>, action: Action) -> Result<OsmRelation, Error> {
    let mut relation = OsmRelation::new(0, action);
    for attribute in start.attributes() {
        let attribute = map_attr_err(attribute)?;
        let value = attribute.unescape_value_text()?;
        match attribute.key.as_ref() {
            b"id" => relation.id = parse_i64(&value)?,
            _ => apply_meta(&mut relation.meta, attribute.key.as_ref(), &value)?,
        }
    }
    Ok(relation)
}

fn parse_member(start: &BytesStart<'_>) -> Result<RelationMember, Error> {
    let mut kind = ElementKind::Node;
    let mut reference = 0_i64;
    let mut role = String::new();
    for attribute in start.attributes() {
        let attribute = map_attr_err(attribute)?;
        let value = attribute.unescape_value_text()?;
        match attribute.key.as_ref() {
            b"type" => {
                kind = match value.as_ref() {
                    "node" => ElementKind::Node,
                    "way" => ElementKind::Way,
                    "relation" => ElementKind::Relation,
                    other => {
                        return Err(Error::decode(format!("unknown member type {other:?}")));
                    }
                };
            }
            b"ref" => reference = parse_i64(&value)?,
            b"role" => role = value.into_owned(),
            _ => {}
        }
    }
    Ok(RelationMember {
        kind,
        reference,
        role,
    })
}

fn parse_tag(start: &BytesStart<'_>) -> Result<(String, String), Error> {
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
    Ok((key, value))
}

fn apply_meta(meta: &mut ElementMeta, key: &[u8], value: &str) -> Result<(), Error> {
    match key {
        b"version" => meta.version = parse_i64(value)?.try_into().unwrap_or(i32::MAX),
        b"changeset" => meta.changeset = parse_i64(value)?,
        b"uid" => meta.uid = parse_i64(value)?,
        b"user" => meta.user = value.to_owned(),
        b"timestamp" => meta.timestamp = Some(parse_timestamp(value)?),
        _ => {}
    }
    Ok(())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| Error::decode(format!("bad timestamp {value:?}: {err}")))
}

pub(crate) fn parse_i64(value: &str) -> Result<i64, Error> {
    value
        .parse()
        .map_err(|_| Error::decode(format!("bad integer {value:?}")))
}

pub(crate) fn parse_f64(value: &str) -> Result<f64, Error> {
    value
        .parse()
        .map_err(|_| Error::decode(format!("bad coordinate {value:?}")))
}

/// Attribute helpers shared by both document readers.
pub(crate) trait AttributeExt {
    fn unescape_value_text(&self) -> Result<std::borrow::Cow<'_, str>, Error>;
}

impl AttributeExt for quick_xml::events::attributes::Attribute<'_> {
    fn unescape_value_text(&self) -> Result<std::borrow::Cow<'_, str>, Error> {
        self.unescape_value()
            .map_err(|err| Error::decode(format!("bad attribute value: {err}")))
    }
}

pub(crate) fn map_attr_err(
    attribute: Result<
        quick_xml::events::attributes::Attribute<'_>,
        quick_xml::events::attributes::AttrError,
    >,
) -> Result<quick_xml::events::attributes::Attribute<'_>, Error> {
    attribute.map_err(|err| Error::decode(format!("bad attribute: {err}")))
}
