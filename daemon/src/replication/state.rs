//! Parsed `state.txt` documents.
//!
//! Two grammars describe the same data. The changeset namespace publishes
//! a YAML-ish document:
//!
//! ```text
//! ---
//! last_run: 2020-10-08 22:30:01.737719000 +00:00
//! sequence: 4139992
//! ```
//!
//! The change namespaces publish a properties document whose timestamp
//! carries escaped colons:
//!
//! ```text
//! #Fri Oct 09 10:03:04 UTC 2020
//! sequenceNumber=4230996
//! txnMaxQueried=3083073477
//! txnActiveList=
//! txnReadyList=
//! txnMax=3083073477
//! timestamp=2020-10-09T10\:03\:02Z
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::Error;
use crate::replication::ReplicationFrequency;

/// One point in a replication stream.
///
/// A state file is valid once it carries a timestamp, a non-negative
/// sequence, a path and a frequency. Zero is a legitimate sequence for
/// the changeset namespace, so "unset" is modelled as `-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFile {
    pub timestamp: Option<DateTime<Utc>>,
    pub sequence: i64,
    /// Path of the replication file this state describes, without suffix.
    pub path: String,
    pub frequency: Option<ReplicationFrequency>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            timestamp: None,
            sequence: -1,
            path: String::new(),
            frequency: None,
        }
    }
}

impl StateFile {
    /// Whether every field required to act on this state is present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.timestamp.is_some()
            && self.sequence >= 0
            && !self.path.is_empty()
            && self.frequency.is_some()
    }

    /// Attach the replication path this state was fetched from.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Attach the frequency of the namespace this state belongs to.
    #[must_use]
    pub fn with_frequency(mut self, frequency: ReplicationFrequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    /// Parse either state-file grammar.
    ///
    /// The produced state carries timestamp and sequence only; `path` and
    /// `frequency` are known to the caller, not the document.
    ///
    /// # Errors
    ///
    /// Returns a decode error when neither grammar matches or the
    /// timestamp is malformed.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let first = lines
            .next()
            .ok_or_else(|| Error::decode("empty state file"))?;
        if first.trim() == "---" {
            parse_changeset_grammar(lines)
        } else {
            parse_change_grammar(std::iter::once(first).chain(lines))
        }
    }

    /// Render the changeset-style grammar.
    #[must_use]
    pub fn to_changeset_grammar(&self) -> String {
        let timestamp = self
            .timestamp
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.9f +00:00").to_string())
            .unwrap_or_default();
        format!("---\nlast_run: {timestamp}\nsequence: {}\n", self.sequence)
    }

    /// Render the change-style grammar, colons escaped.
    #[must_use]
    pub fn to_change_grammar(&self) -> String {
        let timestamp = self
            .timestamp
            .map(|ts| {
                ts.to_rfc3339_opts(SecondsFormat::Secs, true)
                    .replace(':', "\\:")
            })
            .unwrap_or_default();
        format!(
            "#generated\nsequenceNumber={}\ntxnMaxQueried=\ntxnActiveList=\ntxnReadyList=\ntxnMax=\ntimestamp={timestamp}\n",
            self.sequence
        )
    }
}

/// Durable store of state files keyed by `(frequency, path)`, indexed
/// by timestamp and sequence; caches server lookups across restarts.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The newest cached state for a frequency.
    ///
    /// # Errors
    ///
    /// Returns a database error when the query fails.
    async fn last_state(&self, frequency: ReplicationFrequency)
    -> Result<Option<StateFile>, Error>;

    /// The earliest cached state at or after `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns a database error when the query fails.
    async fn first_state_after(
        &self,
        frequency: ReplicationFrequency,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<StateFile>, Error>;

    /// Persist a state, upserting on `(frequency, path)`.
    ///
    /// # Errors
    ///
    /// Returns a database error when the write fails.
    async fn write_state(&self, state: &StateFile) -> Result<(), Error>;
}

fn parse_changeset_grammar<'a>(lines: impl Iterator<Item = &'a str>) -> Result<StateFile, Error> {
    let mut state = StateFile::default();
    for line in lines {
        if let Some(value) = line.strip_prefix("last_run:") {
            let value = value.trim();
            let parsed = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f %:z")
                .map_err(|err| Error::decode(format!("bad last_run timestamp {value:?}: {err}")))?;
            state.timestamp = Some(parsed.with_timezone(&Utc));
        } else if let Some(value) = line.strip_prefix("sequence:") {
            let value = value.trim();
            state.sequence = value
                .parse()
                .map_err(|_| Error::decode(format!("bad sequence {value:?}")))?;
        }
    }
    if state.timestamp.is_none() || state.sequence < 0 {
        return Err(Error::decode("changeset state file missing fields"));
    }
    Ok(state)
}

fn parse_change_grammar<'a>(lines: impl Iterator<Item = &'a str>) -> Result<StateFile, Error> {
    let mut state = StateFile::default();
    for line in lines {
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "sequenceNumber" => {
                state.sequence = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::decode(format!("bad sequenceNumber {value:?}")))?;
            }
            "timestamp" => {
                // The ISO timestamp arrives with escaped colons.
                let unescaped = value.trim().replace("\\:", ":");
                let parsed = DateTime::parse_from_rfc3339(&unescaped).map_err(|err| {
                    Error::decode(format!("bad state timestamp {unescaped:?}: {err}"))
                })?;
                state.timestamp = Some(parsed.with_timezone(&Utc));
            }
            _ => {}
        }
    }
    if state.timestamp.is_none() || state.sequence < 0 {
        return Err(Error::decode("change state file missing fields"));
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const CHANGESET_STATE: &str =
        "---\nlast_run: 2020-10-08 22:30:01.737719000 +00:00\nsequence: 4139992\n";
    const CHANGE_STATE: &str = "#Fri Oct 09 10:03:04 UTC 2020\nsequenceNumber=4230996\ntxnMaxQueried=3083073477\ntxnActiveList=\ntxnReadyList=\ntxnMax=3083073477\ntimestamp=2020-10-09T10\\:03\\:02Z\n";

    #[test]
    fn changeset_grammar_parses() {
        let state = StateFile::parse(CHANGESET_STATE).expect("changeset grammar");
        assert_eq!(state.sequence, 4_139_992);
        let expected = Utc
            .with_ymd_and_hms(2020, 10, 8, 22, 30, 1)
            .single()
            .expect("valid timestamp");
        assert_eq!(
            state.timestamp.expect("timestamp parsed").timestamp(),
            expected.timestamp()
        );
    }

    #[test]
    fn change_grammar_unescapes_colons() {
        let state = StateFile::parse(CHANGE_STATE).expect("change grammar");
        assert_eq!(state.sequence, 4_230_996);
        let expected = Utc
            .with_ymd_and_hms(2020, 10, 9, 10, 3, 2)
            .single()
            .expect("valid timestamp");
        assert_eq!(state.timestamp, Some(expected));
    }

    #[test]
    fn invalid_until_path_and_frequency_attached() {
        let state = StateFile::parse(CHANGE_STATE).expect("change grammar");
        assert!(!state.is_valid());
        let state = state
            .with_path("/replication/minute/004/230/996")
            .with_frequency(ReplicationFrequency::Minutely);
        assert!(state.is_valid());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(StateFile::parse("").is_err());
        assert!(StateFile::parse("not a state file\nat all\n").is_err());
    }
}
