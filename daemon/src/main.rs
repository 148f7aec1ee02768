#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]
//! Daemon entry-point: wires configuration, database, plugin, mirrors
//! and the two replication drivers.

use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{WrapErr, eyre};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use pathwatch::config::{Cli, DaemonConfig};
use pathwatch::domain::{
    DefaultValidation, Error, PriorityArea, ReplicationSource, RoundSink, ValidatorPlugin,
};
use pathwatch::outbound::persistence::Db;
use pathwatch::outbound::{LoadedValidator, TaskingManagerDirectory};
use pathwatch::replication::{
    ChangeWorker, ChangesetWorker, Clock, DriverSettings, PlanetClient, ReplicationFrequency,
    SystemClock, monitor_changes, monitor_changesets, resume_cursor,
};
use pathwatch::sync::run_user_sync;

fn load_priority_area(config: &DaemonConfig) -> Result<PriorityArea, Error> {
    match &config.priority_polygon_path {
        Some(path) => PriorityArea::from_geojson_path(path),
        None => Ok(PriorityArea::everywhere()),
    }
}

fn load_validator(config: &DaemonConfig) -> Result<Arc<dyn ValidatorPlugin>, Error> {
    match &config.plugin_path {
        Some(path) => Ok(Arc::new(LoadedValidator::load(path)?)),
        None => {
            info!("no plugin configured, using built-in validation rules");
            Ok(Arc::new(DefaultValidation::new()))
        }
    }
}

fn build_mirrors(config: &DaemonConfig) -> Result<Vec<Arc<dyn ReplicationSource>>, Error> {
    config
        .planet_servers
        .iter()
        .map(|server| {
            PlanetClient::new(server.domain.clone(), config.download_timeout)
                .map(|client| Arc::new(client) as Arc<dyn ReplicationSource>)
        })
        .collect()
}

/// Application bootstrap. Fatal failures (config, database, plugin)
/// terminate with a nonzero exit; reaching `end_time` exits cleanly.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    if let Err(err) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
    {
        warn!(error = %err, "tracing init failed");
    }

    let cli = Cli::parse();
    let config = DaemonConfig::resolve(&cli).wrap_err("configuration is unusable")?;
    let area = Arc::new(load_priority_area(&config).wrap_err("priority polygon is unusable")?);
    let plugin = load_validator(&config).wrap_err("validator plugin failed to load")?;
    let mirrors = Arc::new(build_mirrors(&config)?);
    let datadir = config
        .planet_servers
        .first()
        .map(|server| server.datadir.clone())
        .ok_or_else(|| eyre!("no planet servers configured"))?;

    let state_db = Db::connect(&config.underpass_db_url)
        .await
        .wrap_err("cannot connect to the underpass database")?;
    let round_db = if config.galaxy_db_url.is_some() {
        Db::connect(config.round_db_url())
            .await
            .wrap_err("cannot connect to the galaxy database")?
    } else {
        state_db.clone()
    };
    let sink: Arc<dyn RoundSink> = Arc::new(round_db.clone());

    let (active_tx, active_rx) = watch::channel(true);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, draining current rounds");
            let _ = active_tx.send(false);
        }
    });

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = DriverSettings {
        concurrency: config.concurrency,
        end_time: config.end_time,
    };
    let categories = Arc::new(config.stats_categories.clone());

    let mut drivers: Vec<JoinHandle<Result<(), Error>>> = Vec::new();

    // Changeset metadata feed.
    {
        let remote = resume_cursor(
            &**mirrors.first().ok_or_else(|| eyre!("no mirrors"))?,
            &state_db,
            &datadir,
            ReplicationFrequency::Changesets,
            config.start_time,
            config.destdir.clone(),
        )
        .await
        .wrap_err("cannot locate the changeset resume point")?;
        let worker = ChangesetWorker {
            mirrors: Arc::clone(&mirrors),
            area: Arc::clone(&area),
        };
        drivers.push(tokio::spawn(monitor_changesets(
            remote,
            worker,
            Arc::clone(&sink),
            settings.clone(),
            Arc::clone(&clock),
            active_rx.clone(),
        )));
    }

    // Element change feed at the configured frequency.
    if config.frequency != ReplicationFrequency::Changesets {
        let remote = resume_cursor(
            &**mirrors.first().ok_or_else(|| eyre!("no mirrors"))?,
            &state_db,
            &datadir,
            config.frequency,
            config.start_time,
            config.destdir.clone(),
        )
        .await
        .wrap_err("cannot locate the change resume point")?;
        let worker = ChangeWorker {
            mirrors: Arc::clone(&mirrors),
            area: Arc::clone(&area),
            categories: Arc::clone(&categories),
            plugin: Arc::clone(&plugin),
            lookup: Arc::new(round_db.clone()),
            disable_stats: config.disable_stats,
            disable_validation: config.disable_validation,
            disable_raw: config.disable_raw,
        };
        drivers.push(tokio::spawn(monitor_changes(
            remote,
            worker,
            Arc::clone(&sink),
            settings,
            Arc::clone(&clock),
            active_rx.clone(),
        )));
    }

    // Independent user synchronization cadence.
    if let Some(url) = &config.taskingmanager_db_url
        && !config.taskingmanager_users_update_frequency.is_zero()
    {
        let directory = Arc::new(TaskingManagerDirectory::new(url.clone()));
        tokio::spawn(run_user_sync(
            directory,
            round_db.clone(),
            config.taskingmanager_users_update_frequency,
            active_rx.clone(),
        ));
    }

    for driver in drivers {
        driver.await.wrap_err("driver task aborted")??;
    }
    info!("all drivers stopped");
    Ok(())
}
