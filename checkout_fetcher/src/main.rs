#![warn(clippy::pedantic)]
mod error;
mod health;
mod sync;

use crate::error::MainError;
use crate::health::{run_health_server, stale_after};
use crate::sync::{SyncLoop, SyncSettings, SyncStatus};
use shared::database::checkins::{CheckinFilter, list_checkins};
use shared::database::locations::{LocationFilter, create_location, list_locations};
use shared::database::models::Location;
use shared::error::InitializationError;
use shared::planning_center::{Checkout, PlanningCenterClient, SourceClient, SyntheticSource};
use shared::{FetcherConfig, SourceKind, init_tracing, initialize_db, load_config, shutdown_listener};
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEMO_LOCATION_ID: &str = "pcloc_12345";
const DEMO_LOCATION_NAME: &str = "Test Location";

#[tokio::main]
async fn main() -> Result<(), MainError> {
    init_tracing()?;

    let config = load_config().map_err(InitializationError::from)?;
    let settings = sync_settings(&config.fetcher)?;
    let db_pool = initialize_db(&config.database, true).await?;

    let status = SyncStatus::default();

    // Cancellation token shared across tasks; listener cancels on SIGINT/SIGTERM.
    let shutdown_token = CancellationToken::new();
    let signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));

    let health_handle = tokio::spawn(run_health_server(
        config.fetcher.health_addr.clone(),
        status.clone(),
        stale_after(settings.interval),
        shutdown_token.clone(),
    ));

    let mut fetcher_handle = match config.fetcher.source {
        SourceKind::PlanningCenter => {
            let source = PlanningCenterClient::new(&config.planning_center)?;
            spawn_sync(db_pool, source, settings, status, shutdown_token.clone())
        }
        SourceKind::Synthetic => {
            warn!(name: "source.synthetic", seed = config.fetcher.synthetic_seed, "using synthetic checkout source");
            seed_demo_location(&db_pool).await?;
            let source = SyntheticSource::new(config.fetcher.synthetic_seed);
            restore_synthetic_roster(&db_pool, &source).await?;
            spawn_sync(db_pool, source, settings, status, shutdown_token.clone())
        }
    };

    // Let the fetcher finish its current location before exiting.
    tokio::select! {
        res = health_handle => {
            shutdown_token.cancel();
            let drained = fetcher_handle.await;
            res??;
            drained?;
        }
        res = &mut fetcher_handle => {
            shutdown_token.cancel();
            res?;
        }
    }
    signal_handle.abort();

    Ok(())
}

fn sync_settings(config: &FetcherConfig) -> Result<SyncSettings, MainError> {
    if config.interval_seconds == 0 {
        return Err(MainError::InvalidSetting("interval_seconds must be positive"));
    }
    if config.runtime_seconds == 0 {
        return Err(MainError::InvalidSetting("runtime_seconds must be positive"));
    }
    Ok(SyncSettings {
        interval: Duration::from_secs(config.interval_seconds),
        runtime: Duration::from_secs(config.runtime_seconds),
        lookback: Duration::from_secs(config.lookback_seconds),
    })
}

fn spawn_sync<S>(
    pool: Pool<Sqlite>,
    source: S,
    settings: SyncSettings,
    status: SyncStatus,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    S: SourceClient + Send + Sync + 'static,
{
    let sync_loop = SyncLoop::new(pool, source, settings, status);
    tokio::spawn(async move { sync_loop.run(shutdown).await })
}

/// Hands children still marked present in the database back to the synthetic source.
async fn restore_synthetic_roster(
    pool: &Pool<Sqlite>,
    source: &SyntheticSource,
) -> Result<(), MainError> {
    let filter = LocationFilter {
        auto_fetch: Some(true),
        ..LocationFilter::default()
    };
    for location in list_locations(pool, &filter).await? {
        let present = CheckinFilter {
            location_id: Some(location.id),
            checked_out: Some(false),
            ..CheckinFilter::default()
        };
        let children: Vec<Checkout> = list_checkins(pool, &present)
            .await?
            .into_iter()
            .map(|checkin| Checkout {
                id: checkin.external_id,
                first_name: checkin.first_name,
                last_name: checkin.last_name,
                security_code: checkin.security_code,
                checked_out_at: None,
            })
            .collect();
        info!(name: "source.synthetic.restored", location_id = %location.external_id, count = children.len(), "restored present children");
        source.restore_present(&location.external_id, children);
    }
    Ok(())
}

/// Synthetic mode needs at least one location to generate traffic for.
async fn seed_demo_location(pool: &Pool<Sqlite>) -> Result<(), MainError> {
    let location = create_location(
        pool,
        Location {
            external_id: DEMO_LOCATION_ID.to_string(),
            name: DEMO_LOCATION_NAME.to_string(),
            auto_fetch: true,
            ..Location::default()
        },
    )
    .await?;
    info!(name: "source.synthetic.location", id = location.id, external_id = %location.external_id, "demo location ready");
    Ok(())
}
