//! Daemon configuration: YAML file, environment overrides, CLI surface.
//!
//! Precedence is file < environment < CLI. Unknown file keys and
//! malformed values are fatal; the daemon never starts on a config it
//! only partially understood.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::Parser;
use serde::Deserialize;

use crate::domain::{Error, StatsCategories};
use crate::replication::ReplicationFrequency;

const DEFAULT_PLANET_DOMAIN: &str = "planet.openstreetmap.org";
const DEFAULT_DATADIR: &str = "replication";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Command-line surface of the daemon.
#[derive(Debug, Clone, Parser, Default)]
#[command(
    name = "pathwatch",
    about = "OSM replication monitoring daemon",
    version
)]
pub struct Cli {
    /// YAML configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Replication frequency to monitor (minutely, hourly, daily).
    #[arg(long)]
    pub frequency: Option<String>,
    /// Worker tasks per round while catching up.
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Process files starting from this timestamp (RFC 3339).
    #[arg(long, value_name = "TIMESTAMP")]
    pub start_time: Option<String>,
    /// Stop once a file at or past this timestamp is observed.
    #[arg(long, value_name = "TIMESTAMP")]
    pub end_time: Option<String>,
    /// Skip statistics collection.
    #[arg(long)]
    pub disable_stats: bool,
    /// Skip the validation engine.
    #[arg(long)]
    pub disable_validation: bool,
    /// Skip raw geometry materialization.
    #[arg(long)]
    pub disable_raw: bool,
    /// Cache downloaded artifacts below this directory.
    #[arg(long, value_name = "DIR")]
    pub destdir: Option<PathBuf>,
    /// GeoJSON file with the priority polygon.
    #[arg(long, value_name = "FILE")]
    pub priority_polygon: Option<PathBuf>,
    /// Validator plugin shared library.
    #[arg(long, value_name = "FILE")]
    pub plugin: Option<PathBuf>,
}

/// One planet mirror entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanetServer {
    pub domain: String,
    #[serde(default = "default_datadir")]
    pub datadir: String,
}

fn default_datadir() -> String {
    DEFAULT_DATADIR.to_owned()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    concurrency: Option<usize>,
    planet_servers: Option<Vec<PlanetServer>>,
    underpass_db_url: Option<String>,
    osm2pgsql_db_url: Option<String>,
    galaxy_db_url: Option<String>,
    taskingmanager_db_url: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    disable_stats: Option<bool>,
    disable_validation: Option<bool>,
    disable_raw: Option<bool>,
    priority_polygon_path: Option<PathBuf>,
    frequency: Option<String>,
    taskingmanager_users_update_frequency: Option<u64>,
    destdir: Option<PathBuf>,
    plugin_path: Option<PathBuf>,
    stats_categories: Option<BTreeMap<String, String>>,
    download_timeout_seconds: Option<u64>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub concurrency: usize,
    pub planet_servers: Vec<PlanetServer>,
    /// The daemon's own database: states cache, and every output table
    /// unless `galaxy_db_url` points elsewhere.
    pub underpass_db_url: String,
    /// Accepted for deployment compatibility; the osm2pgsql side-channel
    /// updater is outside this daemon.
    pub osm2pgsql_db_url: Option<String>,
    /// Alternate database for statistics, validation and raw output.
    pub galaxy_db_url: Option<String>,
    pub taskingmanager_db_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub disable_stats: bool,
    pub disable_validation: bool,
    pub disable_raw: bool,
    pub priority_polygon_path: Option<PathBuf>,
    pub frequency: ReplicationFrequency,
    pub taskingmanager_users_update_frequency: Duration,
    pub destdir: Option<PathBuf>,
    pub plugin_path: Option<PathBuf>,
    pub stats_categories: StatsCategories,
    pub download_timeout: Duration,
}

impl DaemonConfig {
    /// Resolve the effective configuration from file, environment and
    /// CLI, in that precedence order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unreadable or unknown config
    /// keys, malformed values, or a missing database URL.
    pub fn resolve(cli: &Cli) -> Result<Self, Error> {
        let file = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|err| {
                    Error::configuration(format!("cannot read {}: {err}", path.display()))
                })?;
                serde_yaml::from_str::<FileConfig>(&text).map_err(|err| {
                    Error::configuration(format!("bad config {}: {err}", path.display()))
                })?
            }
            None => FileConfig::default(),
        };

        let underpass_db_url = env_override("PATHWATCH_UNDERPASS_DB_URL")
            .or(file.underpass_db_url)
            .ok_or_else(|| Error::configuration("underpass_db_url is required"))?;
        let planet_servers = file.planet_servers.unwrap_or_else(|| {
            vec![PlanetServer {
                domain: DEFAULT_PLANET_DOMAIN.to_owned(),
                datadir: DEFAULT_DATADIR.to_owned(),
            }]
        });
        if planet_servers.is_empty() {
            return Err(Error::configuration("planet_servers must not be empty"));
        }

        let frequency = match cli.frequency.as_deref().or(file.frequency.as_deref()) {
            Some(value) => ReplicationFrequency::from_path_str(value)?,
            None => ReplicationFrequency::Minutely,
        };
        let concurrency = cli
            .concurrency
            .or(file.concurrency)
            .unwrap_or_else(default_concurrency);

        let start_time = parse_optional_time(cli.start_time.as_deref().or(file.start_time.as_deref()))?;
        let end_time = parse_optional_time(cli.end_time.as_deref().or(file.end_time.as_deref()))?;

        Ok(Self {
            concurrency,
            planet_servers,
            underpass_db_url,
            osm2pgsql_db_url: env_override("PATHWATCH_OSM2PGSQL_DB_URL").or(file.osm2pgsql_db_url),
            galaxy_db_url: env_override("PATHWATCH_GALAXY_DB_URL").or(file.galaxy_db_url),
            taskingmanager_db_url: env_override("PATHWATCH_TASKINGMANAGER_DB_URL")
                .or(file.taskingmanager_db_url),
            start_time,
            end_time,
            disable_stats: cli.disable_stats || file.disable_stats.unwrap_or(false),
            disable_validation: cli.disable_validation || file.disable_validation.unwrap_or(false),
            disable_raw: cli.disable_raw || file.disable_raw.unwrap_or(false),
            priority_polygon_path: cli
                .priority_polygon
                .clone()
                .or(file.priority_polygon_path),
            frequency,
            taskingmanager_users_update_frequency: Duration::from_secs(
                file.taskingmanager_users_update_frequency.unwrap_or(0),
            ),
            destdir: cli.destdir.clone().or(file.destdir),
            plugin_path: cli.plugin.clone().or(file.plugin_path),
            stats_categories: StatsCategories::from_map(
                file.stats_categories.unwrap_or_default(),
            ),
            download_timeout: Duration::from_secs(
                file.download_timeout_seconds
                    .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            ),
        })
    }

    /// The database that receives round output.
    #[must_use]
    pub fn round_db_url(&self) -> &str {
        self.galaxy_db_url.as_deref().unwrap_or(&self.underpass_db_url)
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_optional_time(value: Option<&str>) -> Result<Option<DateTime<Utc>>, Error> {
    let Some(value) = value else { return Ok(None) };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| Error::configuration(format!("bad timestamp {value:?}")))
}
