pub mod api;
pub mod client;
pub mod synthetic;

pub use client::PlanningCenterClient;
pub use synthetic::SyntheticSource;

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Hard ceiling on pages walked by one `fetch_checkouts` call.
pub const MAX_PAGES: usize = 10;
/// Largest page size the check-ins endpoint accepts.
pub const MAX_PER_PAGE: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub security_code: String,
    pub checked_out_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid request: {0}")]
    Validation(&'static str),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("client error ({status}): {body}")]
    Client { status: u16, body: String },
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request cancelled")]
    Cancelled,
}

impl SourceError {
    /// Whether the next scheduled cycle may succeed where this call failed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Transport(_))
    }
}

/// The external roster service as seen by the sync loop and the location importer.
pub trait SourceClient {
    /// Checkouts for a location, newest first, stopping at the first event older than
    /// `since`, after `limit` events (`0` = unbounded) or after [`MAX_PAGES`] pages.
    /// `since = None` together with `limit = 0` is rejected without a request.
    fn fetch_checkouts(
        &self,
        location_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<Checkout>, SourceError>> + Send;

    /// The location plus, when asked, every descendant, in [`order_hierarchy`] order.
    fn fetch_location_hierarchy(
        &self,
        location_id: &str,
        include_descendants: bool,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<SourceLocation>, SourceError>> + Send;
}

pub(crate) fn validate_fetch_bounds(
    since: Option<DateTime<Utc>>,
    limit: usize,
) -> Result<(), SourceError> {
    if since.is_none() && limit == 0 {
        return Err(SourceError::Validation(
            "since and limit cannot both be empty",
        ));
    }
    Ok(())
}

/// Deduplicates by id (later entries win) and orders roots first by name, then the
/// remaining locations grouped by parent id and sorted by name within each group.
pub fn order_hierarchy(locations: impl IntoIterator<Item = SourceLocation>) -> Vec<SourceLocation> {
    let unique: BTreeMap<String, SourceLocation> = locations
        .into_iter()
        .map(|location| (location.id.clone(), location))
        .collect();

    let mut ordered: Vec<SourceLocation> = unique.into_values().collect();
    ordered.sort_by(|a, b| {
        let by_parent = match (&a.parent_id, &b.parent_id) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a_parent), Some(b_parent)) => a_parent.cmp(b_parent),
        };
        by_parent
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered
}
