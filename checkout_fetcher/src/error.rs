use shared::database::QueryError;
use shared::planning_center::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not list locations to sync: {0}")]
    ListLocations(#[source] QueryError),
    #[error("fetching checkouts for location {location_id} failed: {source}")]
    Fetch {
        location_id: String,
        #[source]
        source: SourceError,
    },
    #[error("storing checkout {external_id} for location {location_id} failed: {source}")]
    Upsert {
        location_id: String,
        external_id: String,
        #[source]
        source: QueryError,
    },
    #[error("advancing watermark for location {location_id} failed: {source}")]
    Watermark {
        location_id: String,
        #[source]
        source: QueryError,
    },
}

impl SyncError {
    /// External id of the location the cycle stopped at, if the failure was location specific.
    pub fn location_id(&self) -> Option<&str> {
        match self {
            Self::ListLocations(_) => None,
            Self::Fetch { location_id, .. }
            | Self::Upsert { location_id, .. }
            | Self::Watermark { location_id, .. } => Some(location_id),
        }
    }

    /// Database failures and transient source failures may clear up by the next cycle.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { source, .. } => source.is_retryable(),
            Self::ListLocations(_) | Self::Upsert { .. } | Self::Watermark { .. } => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum MainError {
    #[error(transparent)]
    Init(#[from] shared::error::InitializationError),
    #[error("invalid fetcher setting: {0}")]
    InvalidSetting(&'static str),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}
