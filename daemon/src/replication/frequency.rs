//! Replication intervals published by the planet server.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Error;

/// The publication cadence of a replication namespace.
///
/// The string forms double as the path component under the replication
/// data directory (`minute`, `hour`, `day`, `changesets`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationFrequency {
    Minutely,
    Hourly,
    Daily,
    Changesets,
}

impl ReplicationFrequency {
    /// Path component under the replication data directory.
    #[must_use]
    pub fn as_path_str(self) -> &'static str {
        match self {
            Self::Minutely => "minute",
            Self::Hourly => "hour",
            Self::Daily => "day",
            Self::Changesets => "changesets",
        }
    }

    /// Parse the path form back into a frequency.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown frequency string.
    pub fn from_path_str(value: &str) -> Result<Self, Error> {
        match value {
            "minute" | "minutely" => Ok(Self::Minutely),
            "hour" | "hourly" => Ok(Self::Hourly),
            "day" | "daily" => Ok(Self::Daily),
            "changesets" | "changeset" => Ok(Self::Changesets),
            other => Err(Error::configuration(format!(
                "unknown replication frequency: {other}"
            ))),
        }
    }

    /// File suffix of the data artifact published at each sequence.
    #[must_use]
    pub fn data_suffix(self) -> &'static str {
        match self {
            Self::Changesets => ".osm.gz",
            _ => ".osc.gz",
        }
    }

    /// The interval between consecutive published sequences.
    ///
    /// Changesets are published on the minutely cadence.
    #[must_use]
    pub fn period(self) -> Duration {
        match self {
            Self::Minutely | Self::Changesets => Duration::from_secs(60),
            Self::Hourly => Duration::from_secs(3600),
            Self::Daily => Duration::from_secs(86_400),
        }
    }
}

impl fmt::Display for ReplicationFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path_str())
    }
}
