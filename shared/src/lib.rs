pub mod database;
pub mod planning_center;

use crate::error::{ConfigError, InitializationError};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use tracing_subscriber::EnvFilter;

pub const ENV_VAR_PREFIX: &str = "KIDS_CHECKIN__";
pub const SETTINGS_FILE: &str = "Settings.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub planning_center: PlanningCenterConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    pub importer: Option<ImporterConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://kids-checkin.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlanningCenterConfig {
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for PlanningCenterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.planningcenteronline.com".to_string(),
            client_id: None,
            client_secret: None,
            timeout_seconds: 10,
        }
    }
}

/// Which implementation of [`planning_center::SourceClient`] a binary should use.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    PlanningCenter,
    Synthetic,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetcherConfig {
    pub interval_seconds: u64,
    pub runtime_seconds: u64,
    pub lookback_seconds: u64,
    pub source: SourceKind,
    pub synthetic_seed: u64,
    pub health_addr: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3,
            runtime_seconds: 5000,
            lookback_seconds: 12 * 60 * 60,
            source: SourceKind::PlanningCenter,
            synthetic_seed: 0,
            health_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImporterConfig {
    pub root_location_id: String,
    #[serde(default)]
    pub auto_fetch: bool,
    #[serde(default)]
    pub source: SourceKind,
}

pub fn load_config() -> Result<Config, ConfigError> {
    Ok(Figment::new()
        .merge(Toml::file(SETTINGS_FILE))
        .merge(Env::prefixed(ENV_VAR_PREFIX).split("__"))
        .extract::<Config>()?)
}

pub mod error {
    use thiserror::Error;
    use tracing::dispatcher::SetGlobalDefaultError;

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("failed to load configuration: {0}")]
        Figment(#[from] figment::Error),
    }

    #[derive(Debug, Error)]
    pub enum InitializationError {
        #[error(transparent)]
        Tracing(#[from] SetGlobalDefaultError),
        #[error(transparent)]
        Config(#[from] ConfigError),
        #[error(transparent)]
        Migration(#[from] sqlx::migrate::MigrateError),
        #[error(transparent)]
        Db(#[from] sqlx::Error),
    }
}

pub fn init_tracing() -> Result<(), InitializationError> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(EnvFilter::from_default_env())
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[instrument(skip(db_config))]
pub async fn initialize_db(
    db_config: &DatabaseConfig,
    migrate: bool,
) -> Result<Pool<Sqlite>, InitializationError> {
    // WAL lets the presentation layer keep reading while the fetcher writes
    let options = SqliteConnectOptions::from_str(&db_config.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!(name: "db.connected", "db pool created and connected");

    // Run any new migrations
    if migrate {
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    Ok(pool)
}

/// Opens a migrated in-memory database. Every connection to `sqlite::memory:` is a
/// separate database, so the pool is pinned to one connection that never expires.
pub async fn initialize_memory_db() -> Result<Pool<Sqlite>, InitializationError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

pub async fn shutdown_listener(token: Option<CancellationToken>) {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(name: "signal.sigterm.install_failed", error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(name: "signal.ctrlc.received", "received Ctrl+C signal, shutting down"),
        () = terminate => info!(name: "signal.sigterm.received", "received SIGTERM signal, shutting down"),
    }

    if let Some(token) = token {
        token.cancel();
    }
}
