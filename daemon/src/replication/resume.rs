//! Locating where a restarted daemon should pick up.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::{Error, ReplicationSource};
use crate::replication::planet::{fetch_first_state, fetch_last_state, find_state_by_time};
use crate::replication::{RemoteUrl, ReplicationFrequency, StateFile, StateStore};

/// Resolve the cursor a driver should start from.
///
/// The cached state wins when present; otherwise the mirror's
/// per-frequency `state.txt` seeds the store. A configured `start_time`
/// earlier than the cached cursor walks backwards, first through the
/// store and then by binary search on the server.
///
/// # Errors
///
/// Returns an error when neither the store nor the mirror can produce a
/// valid starting state.
pub async fn resume_cursor(
    source: &dyn ReplicationSource,
    store: &dyn StateStore,
    datadir: &str,
    frequency: ReplicationFrequency,
    start_time: Option<DateTime<Utc>>,
    destdir: Option<PathBuf>,
) -> Result<RemoteUrl, Error> {
    let mut state = match store.last_state(frequency).await? {
        Some(cached) if cached.is_valid() => {
            debug!(%frequency, sequence = cached.sequence, "resuming from cached state");
            cached
        }
        _ => {
            let fresh = fetch_last_state(source, datadir, frequency).await?;
            store.write_state(&fresh).await?;
            info!(%frequency, sequence = fresh.sequence, "seeded state from mirror");
            fresh
        }
    };

    if let (Some(start), Some(cursor_ts)) = (start_time, state.timestamp)
        && start < cursor_ts
    {
        state = rewind_to(source, store, datadir, frequency, start, &state).await?;
    }

    let sequence = u64::try_from(state.sequence)
        .map_err(|_| Error::decode("resume state carries a negative sequence"))?;
    let mut remote = RemoteUrl::from_sequence(source.domain(), datadir, frequency, sequence);
    if let Some(destdir) = destdir {
        remote = remote.with_destdir(destdir);
    }
    Ok(remote)
}

async fn rewind_to(
    source: &dyn ReplicationSource,
    store: &dyn StateStore,
    datadir: &str,
    frequency: ReplicationFrequency,
    start: DateTime<Utc>,
    newest: &StateFile,
) -> Result<StateFile, Error> {
    if let Some(cached) = store.first_state_after(frequency, start).await? {
        info!(%frequency, sequence = cached.sequence, "rewound via state store");
        return Ok(cached);
    }
    // A start older than the namespace itself clamps to its first file.
    if let Ok(first) = fetch_first_state(source, datadir, frequency).await
        && first.timestamp.is_some_and(|ts| ts >= start)
    {
        store.write_state(&first).await?;
        info!(%frequency, sequence = first.sequence, "start time predates history");
        return Ok(first);
    }
    let newest_sequence = u64::try_from(newest.sequence)
        .map_err(|_| Error::decode("newest state carries a negative sequence"))?;
    let found = find_state_by_time(source, datadir, frequency, start, newest_sequence).await?;
    store.write_state(&found).await?;
    info!(%frequency, sequence = found.sequence, "rewound via server search");
    Ok(found)
}
