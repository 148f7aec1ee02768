//! Reqwest-backed planet mirror client and state discovery helpers.
//!
//! This adapter owns transport details only: keep-alive connections,
//! timeout and status mapping, and the sanity rules that decide whether
//! a body is a real artifact.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::domain::{Download, DownloadStatus, Error, ReplicationSource};
use crate::replication::{ReplicationFrequency, StateFile, sequence_to_path};

/// Bodies shorter than this are error pages or truncated transfers, not
/// replication artifacts.
pub const DOWNLOAD_SANITY_FLOOR: usize = 10;

const DEFAULT_USER_AGENT: &str = "pathwatch-replication/0.1";

/// One planet mirror behind a persistent HTTPS client.
#[derive(Debug, Clone)]
pub struct PlanetClient {
    client: Client,
    domain: String,
}

impl PlanetClient {
    /// Build a client bound to one mirror with an explicit per-download
    /// timeout. The underlying connection pool keeps connections alive
    /// and transparently re-establishes dropped streams.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the client cannot be constructed.
    pub fn new(domain: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|err| Error::transport(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            client,
            domain: domain.into(),
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<(StatusCode, Vec<u8>), reqwest::Error> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body.to_vec()))
    }
}

#[async_trait]
impl ReplicationSource for PlanetClient {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn download(&self, url: &str) -> Download {
        // Partial reads get one retry on the same client before the
        // failure is reported.
        let fetched = match self.fetch_once(url).await {
            Ok(result) => Ok(result),
            Err(first) => {
                debug!(url, error = %first, "download failed, retrying once");
                self.fetch_once(url).await
            }
        };
        match fetched {
            Ok((StatusCode::NOT_FOUND, _)) => Download::failed(DownloadStatus::RemoteNotFound),
            Ok((status, body)) if status.is_success() => {
                if body.len() < DOWNLOAD_SANITY_FLOOR {
                    Download::failed(DownloadStatus::RemoteNotFound)
                } else {
                    Download::success(body)
                }
            }
            Ok((status, _)) => {
                warn!(url, status = status.as_u16(), "unexpected download status");
                Download::failed(DownloadStatus::IoError)
            }
            Err(error) => {
                warn!(url, error = %error, "download failed");
                Download::failed(DownloadStatus::IoError)
            }
        }
    }

    async fn scan_directory(&self, url: &str) -> Result<Vec<String>, Error> {
        let (status, body) = self
            .fetch_once(url)
            .await
            .map_err(|err| Error::transport(format!("directory scan failed: {err}")))?;
        if !status.is_success() {
            return Err(Error::remote_not_found(format!(
                "directory scan of {url} returned {status}"
            )));
        }
        let text = String::from_utf8_lossy(&body);
        Ok(extract_links(&text))
    }
}

/// Pull anchor targets out of a directory index page.
///
/// Planet index pages are plain `<a href="...">` listings; a tolerant
/// scan keeps this free of a full HTML parser.
#[must_use]
pub fn extract_links(html: &str) -> Vec<String> {
    let mut links = Vec::new();
    let mut rest = html;
    while let Some(position) = rest.find("href=\"") {
        let after = &rest[position + 6..];
        if let Some(end) = after.find('"') {
            let target = &after[..end];
            if !target.is_empty() && !target.starts_with('?') && target != "../" {
                links.push(target.to_owned());
            }
            rest = &after[end..];
        } else {
            break;
        }
    }
    links
}

/// Read `<datadir>/<frequency>/state.txt` to learn the newest published
/// sequence, then materialize its numbered state file. The summary
/// document stands in when the numbered file is missing.
///
/// # Errors
///
/// Returns a remote-not-found or decode error when the mirror does not
/// serve a parseable state document.
pub async fn fetch_last_state(
    source: &dyn ReplicationSource,
    datadir: &str,
    frequency: ReplicationFrequency,
) -> Result<StateFile, Error> {
    let url = format!(
        "https://{}/{datadir}/{}/state.txt",
        source.domain(),
        frequency.as_path_str()
    );
    let download = source.download(&url).await;
    if download.status != DownloadStatus::Success {
        return Err(Error::remote_not_found(format!(
            "no state.txt for {frequency} on {}",
            source.domain()
        )));
    }
    let text = String::from_utf8_lossy(&download.data);
    let summary = StateFile::parse(&text)?;
    let sequence = u64::try_from(summary.sequence)
        .map_err(|_| Error::decode("negative sequence in state.txt"))?;
    match fetch_state_at(source, datadir, frequency, sequence).await {
        Ok(state) => Ok(state),
        Err(Error::RemoteNotFound { .. }) => Ok(summary
            .with_path(format!(
                "/{datadir}/{}/{}",
                frequency.as_path_str(),
                sequence_to_path(sequence)
            ))
            .with_frequency(frequency)),
        Err(other) => Err(other),
    }
}

/// Materialize the numbered `.state.txt` for one sequence.
///
/// # Errors
///
/// Returns a remote-not-found error when the state file is absent and a
/// decode error when it does not parse.
pub async fn fetch_state_at(
    source: &dyn ReplicationSource,
    datadir: &str,
    frequency: ReplicationFrequency,
    sequence: u64,
) -> Result<StateFile, Error> {
    let subpath = format!(
        "/{datadir}/{}/{}",
        frequency.as_path_str(),
        sequence_to_path(sequence)
    );
    let url = format!("https://{}{subpath}.state.txt", source.domain());
    let download = source.download(&url).await;
    if download.status != DownloadStatus::Success {
        return Err(Error::remote_not_found(format!("no state file at {url}")));
    }
    let text = String::from_utf8_lossy(&download.data);
    Ok(StateFile::parse(&text)?
        .with_path(subpath)
        .with_frequency(frequency))
}

/// Locate the earliest published state of a namespace.
///
/// Sequence 1 is the common case; namespaces whose early history was
/// pruned are walked through their directory index instead.
///
/// # Errors
///
/// Returns an error when neither probe nor index walk finds a state.
pub async fn fetch_first_state(
    source: &dyn ReplicationSource,
    datadir: &str,
    frequency: ReplicationFrequency,
) -> Result<StateFile, Error> {
    if let Ok(state) = fetch_state_at(source, datadir, frequency, 1).await {
        return Ok(state);
    }
    let base = format!(
        "https://{}/{datadir}/{}/",
        source.domain(),
        frequency.as_path_str()
    );
    let major = smallest_numeric_entry(&source.scan_directory(&base).await?)
        .ok_or_else(|| Error::remote_not_found(format!("no replication directories under {base}")))?;
    let minor = smallest_numeric_entry(&source.scan_directory(&format!("{base}{major:03}/")).await?)
        .ok_or_else(|| Error::remote_not_found(format!("{base}{major:03}/ is empty")))?;
    let index = source
        .scan_directory(&format!("{base}{major:03}/{minor:03}/"))
        .await?
        .iter()
        .filter_map(|link| link.strip_suffix(".state.txt"))
        .filter_map(|stem| stem.parse::<u64>().ok())
        .min()
        .ok_or_else(|| {
            Error::remote_not_found(format!("{base}{major:03}/{minor:03}/ has no state files"))
        })?;
    fetch_state_at(
        source,
        datadir,
        frequency,
        major * 1_000_000 + minor * 1_000 + index,
    )
    .await
}

/// Smallest numeric directory entry of an index listing.
fn smallest_numeric_entry(links: &[String]) -> Option<u64> {
    links
        .iter()
        .filter_map(|link| link.trim_end_matches('/').parse::<u64>().ok())
        .min()
}

/// Binary-search the server for the first state whose timestamp reaches
/// `target`, bounded above by the newest published sequence.
///
/// Holes in the namespace (missing state files) are treated as older
/// than the target so the search keeps moving forward.
///
/// # Errors
///
/// Returns an error when no state at or after `target` exists.
pub async fn find_state_by_time(
    source: &dyn ReplicationSource,
    datadir: &str,
    frequency: ReplicationFrequency,
    target: DateTime<Utc>,
    newest_sequence: u64,
) -> Result<StateFile, Error> {
    let mut low = 1_u64;
    let mut high = newest_sequence;
    let mut found: Option<StateFile> = None;
    while low < high {
        let mid = low + (high - low) / 2;
        match fetch_state_at(source, datadir, frequency, mid).await {
            Ok(state) if state.timestamp.is_some_and(|ts| ts >= target) => {
                found = Some(state);
                high = mid;
            }
            Ok(_) | Err(Error::RemoteNotFound { .. }) => low = mid + 1,
            Err(other) => return Err(other),
        }
    }
    if let Some(state) = found
        && state.sequence == i64::try_from(low).unwrap_or(i64::MAX)
    {
        return Ok(state);
    }
    fetch_state_at(source, datadir, frequency, low).await
}
