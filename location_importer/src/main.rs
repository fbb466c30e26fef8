use shared::database::QueryError;
use shared::database::locations::create_location;
use shared::database::models::Location;
use shared::error::InitializationError;
use shared::planning_center::{PlanningCenterClient, SourceClient, SourceError, SyntheticSource};
use shared::{SourceKind, init_tracing, initialize_db, load_config, shutdown_listener};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing()?;

    let config = load_config().map_err(InitializationError::from)?;
    let importer = config.importer.ok_or(AppError::MissingImporterConfig)?;
    info!(root_location_id = %importer.root_location_id, source = ?importer.source, "config loaded");
    let db_pool = initialize_db(&config.database, true).await?;

    let shutdown_token = CancellationToken::new();
    let signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));

    let res = match importer.source {
        SourceKind::PlanningCenter => {
            let source = PlanningCenterClient::new(&config.planning_center)?;
            import_locations(&db_pool, &source, &importer.root_location_id, importer.auto_fetch, &shutdown_token).await
        }
        SourceKind::Synthetic => {
            let source = SyntheticSource::new(config.fetcher.synthetic_seed);
            import_locations(&db_pool, &source, &importer.root_location_id, importer.auto_fetch, &shutdown_token).await
        }
    };
    signal_handle.abort();

    match res {
        Ok(ref locations) => info!(count = locations.len(), "location import was successful"),
        Err(ref e) => error!(error = ?e, "failed to import locations"),
    }

    res.map(|_| ())
}

/// Fetches `root_location_id` with all of its descendants and upserts each one, parents
/// before children. Locations that already exist keep their id and settings.
async fn import_locations<S: SourceClient>(
    pool: &Pool<Sqlite>,
    source: &S,
    root_location_id: &str,
    auto_fetch: bool,
    cancel: &CancellationToken,
) -> Result<Vec<Location>, AppError> {
    let hierarchy = source
        .fetch_location_hierarchy(root_location_id, true, cancel)
        .await?;
    debug!(count = hierarchy.len(), "fetched location hierarchy");

    let mut tx = pool.begin().await?;
    let mut stored = Vec::with_capacity(hierarchy.len());
    for entry in hierarchy {
        let location = create_location(
            &mut *tx,
            Location {
                external_id: entry.id,
                parent_external_id: entry.parent_id,
                name: entry.name,
                auto_fetch,
                ..Location::default()
            },
        )
        .await?;
        debug!(id = location.id, external_id = %location.external_id, name = %location.name, "upserted location");
        stored.push(location);
    }
    tx.commit().await?;

    Ok(stored)
}

#[derive(Debug, Error)]
enum AppError {
    #[error("initialization error: {0}")]
    Initialization(#[from] InitializationError),
    #[error("missing [importer] section with root_location_id")]
    MissingImporterConfig,
    #[error("location source error: {0}")]
    Source(#[from] SourceError),
    #[error("query error: {0}")]
    Query(#[from] QueryError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::database::locations::{LocationFilter, list_locations};
    use shared::initialize_memory_db;

    #[tokio::test]
    async fn import_is_idempotent_and_keeps_parents() {
        let pool = initialize_memory_db().await.unwrap();
        let source = SyntheticSource::new(0);
        let cancel = CancellationToken::new();

        let first = import_locations(&pool, &source, "295939", true, &cancel)
            .await
            .unwrap();
        let second = import_locations(&pool, &source, "295939", true, &cancel)
            .await
            .unwrap();

        assert_eq!(first.len(), 5);
        assert_eq!(first, second);

        let all = list_locations(&pool, &LocationFilter::default()).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].external_id, "295939");
        assert_eq!(all[0].parent_external_id, None);
        assert!(all[1..]
            .iter()
            .all(|l| l.parent_external_id.as_deref() == Some("295939")));
        assert!(all.iter().all(|l| l.auto_fetch));
    }

    #[tokio::test]
    async fn cancelled_import_writes_nothing() {
        let pool = initialize_memory_db().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = import_locations(&pool, &SyntheticSource::new(0), "295939", false, &cancel).await;

        assert!(matches!(result, Err(AppError::Source(SourceError::Cancelled))));
        assert!(list_locations(&pool, &LocationFilter::default()).await.unwrap().is_empty());
    }
}
