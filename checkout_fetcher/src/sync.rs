use crate::error::SyncError;
use chrono::{DateTime, TimeDelta, Utc};
use humantime::format_duration;
use parking_lot::RwLock;
use shared::database::checkins::create_checkin;
use shared::database::locations::{LocationFilter, advance_watermark, list_locations};
use shared::database::models::{Checkin, Location};
use shared::planning_center::{SourceClient, SourceError};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Total time `run` keeps cycling before it stops on its own.
    pub runtime: Duration,
    /// How far back a fetch reaches regardless of the stored watermark.
    pub lookback: Duration,
}

/// Progress shared with the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub last_attempted: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub last_successful: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub last_error: Arc<RwLock<Option<String>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Locations fully synced (events stored and watermark advanced).
    pub locations: usize,
    pub checkouts: usize,
    /// Set when cancellation stopped the cycle before every location was visited.
    pub interrupted: bool,
}

/// Lower bound for the next fetch: the watermark, but never further back than `lookback`.
pub fn effective_since(
    watermark: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lookback: Duration,
) -> DateTime<Utc> {
    let floor = TimeDelta::from_std(lookback)
        .ok()
        .and_then(|lookback| now.checked_sub_signed(lookback))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    watermark.map_or(floor, |watermark| watermark.max(floor))
}

pub struct SyncLoop<S> {
    pool: Pool<Sqlite>,
    source: S,
    settings: SyncSettings,
    status: SyncStatus,
}

impl<S> SyncLoop<S>
where
    S: SourceClient + Sync,
{
    pub fn new(pool: Pool<Sqlite>, source: S, settings: SyncSettings, status: SyncStatus) -> Self {
        Self {
            pool,
            source,
            settings,
            status,
        }
    }

    /// Runs cycles until `runtime` elapses or `cancel` fires. A failed cycle is logged and
    /// recorded for the health endpoint; the next scheduled cycle retries from the watermarks.
    pub async fn run(&self, cancel: CancellationToken) {
        let deadline = cancel.child_token();
        let _deadline_guard = deadline.clone().drop_guard();
        tokio::spawn({
            let deadline = deadline.clone();
            let runtime = self.settings.runtime;
            async move {
                tokio::select! {
                    () = sleep(runtime) => deadline.cancel(),
                    () = deadline.cancelled() => {}
                }
            }
        });

        info!(
            name: "sync.started",
            interval = %format_duration(self.settings.interval),
            runtime = %format_duration(self.settings.runtime),
            lookback = %format_duration(self.settings.lookback),
            "checkout sync started"
        );

        let mut cycles: u64 = 0;
        let mut failures: u64 = 0;
        loop {
            if deadline.is_cancelled() {
                break;
            }

            let now = Utc::now();
            *self.status.last_attempted.write() = Some(now);
            match self.run_cycle(now, &deadline).await {
                Ok(report) if report.interrupted => {
                    info!(
                        name: "sync.cycle.interrupted",
                        locations = report.locations,
                        checkouts = report.checkouts,
                        "cycle stopped early by cancellation"
                    );
                    break;
                }
                Ok(report) => {
                    cycles += 1;
                    *self.status.last_successful.write() = Some(now);
                    info!(
                        name: "sync.cycle.completed",
                        locations = report.locations,
                        checkouts = report.checkouts,
                        "cycle completed"
                    );
                }
                Err(e) => {
                    failures += 1;
                    if e.is_retryable() {
                        warn!(name: "sync.cycle.failed", error = ?e, location_id = ?e.location_id(), "cycle failed, retrying next cycle");
                    } else {
                        error!(name: "sync.cycle.failed", error = ?e, location_id = ?e.location_id(), "cycle failed, retrying next cycle");
                    }
                    *self.status.last_error.write() = Some(e.to_string());
                }
            }

            tokio::select! {
                () = sleep(self.settings.interval) => {}
                () = deadline.cancelled() => break,
            }
        }

        let reason = if cancel.is_cancelled() {
            "shutdown"
        } else {
            "runtime elapsed"
        };
        info!(name: "sync.stopped", cycles, failures, reason, "checkout sync stopped");
    }

    /// One pass over every location with `auto_fetch` set, in id order. Cancellation is
    /// checked before each location; a location whose fetch was cancelled is left untouched.
    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, SyncError> {
        let filter = LocationFilter {
            auto_fetch: Some(true),
            ..LocationFilter::default()
        };
        let locations = list_locations(&self.pool, &filter)
            .await
            .map_err(SyncError::ListLocations)?;
        debug!(count = locations.len(), "selected locations to sync");

        let mut report = CycleReport::default();
        for location in locations {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            match self.sync_location(location, now, cancel).await {
                Ok(checkouts) => {
                    report.locations += 1;
                    report.checkouts += checkouts;
                }
                Err(SyncError::Fetch {
                    location_id,
                    source: SourceError::Cancelled,
                }) => {
                    debug!(location_id = %location_id, "fetch cancelled, location left untouched");
                    report.interrupted = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    async fn sync_location(
        &self,
        mut location: Location,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<usize, SyncError> {
        let since = effective_since(location.last_checked_out_at, now, self.settings.lookback);
        let checkouts = self
            .source
            .fetch_checkouts(&location.external_id, Some(since), 0, cancel)
            .await
            .map_err(|source| SyncError::Fetch {
                location_id: location.external_id.clone(),
                source,
            })?;

        let count = checkouts.len();
        let mut newest: Option<DateTime<Utc>> = None;
        for checkout in checkouts {
            newest = newest.max(checkout.checked_out_at);
            let external_id = checkout.id;
            let checkin = Checkin {
                external_id: external_id.clone(),
                location_id: location.id,
                first_name: checkout.first_name,
                last_name: checkout.last_name,
                security_code: checkout.security_code,
                checked_out_at: checkout.checked_out_at,
                ..Checkin::default()
            };
            create_checkin(&self.pool, checkin)
                .await
                .map_err(|source| SyncError::Upsert {
                    location_id: location.external_id.clone(),
                    external_id,
                    source,
                })?;
        }

        if let Some(newest) = newest
            && location.last_checked_out_at.is_none_or(|watermark| newest > watermark)
        {
            location.last_checked_out_at = Some(newest);
            advance_watermark(&self.pool, location.id, newest)
                .await
                .map_err(|source| SyncError::Watermark {
                    location_id: location.external_id.clone(),
                    source,
                })?;
        } else if count > 0 {
            debug!(
                location_id = %location.external_id,
                "batch carried no newer checkout time, watermark unchanged"
            );
        }

        info!(
            name: "sync.location.synced",
            location_id = %location.external_id,
            since = %since,
            checkouts = count,
            watermark = ?location.last_checked_out_at,
            "location synced"
        );
        Ok(count)
    }
}
