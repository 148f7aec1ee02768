//! The cursor into replication space.
//!
//! A [`RemoteUrl`] names one replication artifact on one mirror: the
//! `(major, minor, index)` triple maps onto the canonical planet path
//! `<datadir>/<frequency>/<MMM>/<NNN>/<III>`. The driver owns the cursor
//! exclusively; workers receive clones.

use std::path::PathBuf;

use crate::domain::Error;
use crate::replication::ReplicationFrequency;

/// Sequences roll over to the next path component at this value.
const PATH_RADIX: u64 = 1000;

/// A position in a mirror's replication namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    /// Mirror host, e.g. `planet.openstreetmap.org`.
    pub domain: String,
    /// Top-level data directory on the mirror, e.g. `replication`.
    pub datadir: String,
    pub frequency: ReplicationFrequency,
    pub major: u64,
    pub minor: u64,
    pub index: u64,
    /// Local cache root; when set, artifacts persist under it.
    pub destdir: Option<PathBuf>,
}

impl RemoteUrl {
    /// Cursor at a specific triple.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        datadir: impl Into<String>,
        frequency: ReplicationFrequency,
        major: u64,
        minor: u64,
        index: u64,
    ) -> Self {
        Self {
            domain: domain.into(),
            datadir: datadir.into(),
            frequency,
            major,
            minor,
            index,
            destdir: None,
        }
    }

    /// Cursor at a linear sequence number.
    #[must_use]
    pub fn from_sequence(
        domain: impl Into<String>,
        datadir: impl Into<String>,
        frequency: ReplicationFrequency,
        sequence: u64,
    ) -> Self {
        let (major, minor, index) = split_sequence(sequence);
        Self::new(domain, datadir, frequency, major, minor, index)
    }

    /// Attach a local cache root.
    #[must_use]
    pub fn with_destdir(mut self, destdir: PathBuf) -> Self {
        self.destdir = Some(destdir);
        self
    }

    /// The linear sequence number encoded by the triple.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.major * PATH_RADIX * PATH_RADIX + self.minor * PATH_RADIX + self.index
    }

    /// The zero-padded `MMM/NNN/III` path fragment.
    #[must_use]
    pub fn triple_path(&self) -> String {
        format!("{:03}/{:03}/{:03}", self.major, self.minor, self.index)
    }

    /// Path below the mirror root, without suffix.
    #[must_use]
    pub fn subpath(&self) -> String {
        format!(
            "/{}/{}/{}",
            self.datadir,
            self.frequency.as_path_str(),
            self.triple_path()
        )
    }

    /// Full URL of the data artifact at this position.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "https://{}{}{}",
            self.domain,
            self.subpath(),
            self.frequency.data_suffix()
        )
    }

    /// Full URL of the state file describing this position.
    #[must_use]
    pub fn state_url(&self) -> String {
        format!("https://{}{}.state.txt", self.domain, self.subpath())
    }

    /// Local cache location of the data artifact, when caching is on.
    #[must_use]
    pub fn filespec(&self) -> Option<PathBuf> {
        self.destdir.as_ref().map(|root| {
            root.join(self.frequency.as_path_str())
                .join(format!("{:03}", self.major))
                .join(format!("{:03}", self.minor))
                .join(format!("{:03}{}", self.index, self.frequency.data_suffix()))
        })
    }

    /// Advance to the successor position in base-1000 lexicographic order.
    ///
    /// `index` carries into `minor` at 999 and `minor` likewise into
    /// `major`.
    pub fn increment(&mut self) {
        self.index += 1;
        if self.index >= PATH_RADIX {
            self.index = 0;
            self.minor += 1;
            if self.minor >= PATH_RADIX {
                self.minor = 0;
                self.major += 1;
            }
        }
    }

    /// Re-pin the cursor to an explicit triple.
    pub fn update_path(&mut self, major: u64, minor: u64, index: u64) {
        self.major = major;
        self.minor = minor;
        self.index = index;
    }

    /// Re-target the cursor at a different mirror.
    pub fn update_domain(&mut self, domain: impl Into<String>) {
        self.domain = domain.into();
    }
}

/// Split a linear sequence into the `(major, minor, index)` triple.
#[must_use]
pub fn split_sequence(sequence: u64) -> (u64, u64, u64) {
    (
        sequence / (PATH_RADIX * PATH_RADIX),
        sequence / PATH_RADIX % PATH_RADIX,
        sequence % PATH_RADIX,
    )
}

/// Render a linear sequence as the canonical `MMM/NNN/III` fragment.
#[must_use]
pub fn sequence_to_path(sequence: u64) -> String {
    let (major, minor, index) = split_sequence(sequence);
    format!("{major:03}/{minor:03}/{index:03}")
}

/// Parse a `MMM/NNN/III` fragment back into its triple.
///
/// # Errors
///
/// Returns a decode error when the fragment does not contain three
/// numeric components.
pub fn parse_triple_path(path: &str) -> Result<(u64, u64, u64), Error> {
    let mut numbers = path
        .split('/')
        .filter(|part| !part.is_empty())
        .rev()
        .take(3)
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| Error::decode(format!("non-numeric path component in {path}")))
        });
    let index = numbers
        .next()
        .ok_or_else(|| Error::decode(format!("path too short: {path}")))??;
    let minor = numbers
        .next()
        .ok_or_else(|| Error::decode(format!("path too short: {path}")))??;
    let major = numbers
        .next()
        .ok_or_else(|| Error::decode(format!("path too short: {path}")))??;
    Ok((major, minor, index))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn cursor(major: u64, minor: u64, index: u64) -> RemoteUrl {
        RemoteUrl::new(
            "planet.openstreetmap.org",
            "replication",
            ReplicationFrequency::Minutely,
            major,
            minor,
            index,
        )
    }

    #[rstest]
    #[case((0, 0, 0), (0, 0, 1))]
    #[case((0, 0, 999), (0, 1, 0))]
    #[case((0, 999, 999), (1, 0, 0))]
    #[case((4, 139, 991), (4, 139, 992))]
    fn increment_is_the_base_1000_successor(
        #[case] from: (u64, u64, u64),
        #[case] to: (u64, u64, u64),
    ) {
        let mut remote = cursor(from.0, from.1, from.2);
        let before = remote.sequence();
        remote.increment();
        assert_eq!((remote.major, remote.minor, remote.index), to);
        assert_eq!(remote.sequence(), before + 1);
    }

    #[test]
    fn sequence_round_trips_through_the_triple() {
        let remote = RemoteUrl::from_sequence(
            "planet.openstreetmap.org",
            "replication",
            ReplicationFrequency::Changesets,
            4_230_996,
        );
        assert_eq!((remote.major, remote.minor, remote.index), (4, 230, 996));
        assert_eq!(remote.sequence(), 4_230_996);
        assert_eq!(sequence_to_path(4_230_996), "004/230/996");
    }

    #[test]
    fn urls_follow_the_planet_layout() {
        let remote = cursor(4, 139, 992);
        assert_eq!(
            remote.url(),
            "https://planet.openstreetmap.org/replication/minute/004/139/992.osc.gz"
        );
        assert_eq!(
            remote.state_url(),
            "https://planet.openstreetmap.org/replication/minute/004/139/992.state.txt"
        );
    }

    #[test]
    fn changesets_use_the_osm_suffix() {
        let remote = RemoteUrl::new(
            "planet.openstreetmap.org",
            "replication",
            ReplicationFrequency::Changesets,
            4,
            139,
            992,
        );
        assert!(remote.url().ends_with("992.osm.gz"));
    }

    #[test]
    fn triple_paths_parse_with_or_without_prefix() {
        assert_eq!(
            parse_triple_path("004/139/992").expect("bare triple"),
            (4, 139, 992)
        );
        assert_eq!(
            parse_triple_path("/replication/minute/004/139/992").expect("prefixed triple"),
            (4, 139, 992)
        );
        assert!(parse_triple_path("004/139").is_err());
    }

    #[test]
    fn filespec_requires_a_destdir() {
        let mut remote = cursor(0, 1, 2);
        assert!(remote.filespec().is_none());
        remote = remote.with_destdir(PathBuf::from("/tmp/cache"));
        assert_eq!(
            remote.filespec().expect("destdir set"),
            PathBuf::from("/tmp/cache/minute/000/001/002.osc.gz")
        );
    }
}
