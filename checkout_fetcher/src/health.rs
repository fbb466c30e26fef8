use crate::sync::SyncStatus;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

const MIN_STALE_AFTER_SECONDS: i64 = 60;

/// A sync is considered stale after three missed intervals, but never sooner than a minute.
pub fn stale_after(interval: Duration) -> TimeDelta {
    TimeDelta::from_std(interval.saturating_mul(3))
        .unwrap_or(TimeDelta::MAX)
        .max(TimeDelta::seconds(MIN_STALE_AFTER_SECONDS))
}

#[derive(Clone)]
struct AxumState {
    status: SyncStatus,
    stale_after: TimeDelta,
}

pub async fn run_health_server(
    addr: String,
    status: SyncStatus,
    stale_after: TimeDelta,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(AxumState {
            status,
            stale_after,
        });
    let listener = TcpListener::bind(&addr).await?;
    info!(name: "health.listening", addr = %listener.local_addr()?, "starting axum health server");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;
    Ok(())
}

async fn health_check(State(state): State<AxumState>) -> impl IntoResponse {
    evaluate(&state.status, state.stale_after, Utc::now())
}

fn evaluate(status: &SyncStatus, stale_after: TimeDelta, now: DateTime<Utc>) -> (StatusCode, String) {
    let last_attempted = *status.last_attempted.read();
    let last_successful = *status.last_successful.read();
    let last_error = status
        .last_error
        .read()
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    match (last_attempted, last_successful) {
        (None, _) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "No attempted or successful checkout syncs".to_string(),
        ),
        (Some(last_attempted), None) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!(
                "Checkouts have not been successfully synced. Last attempted sync: {last_attempted}. Last error: {last_error}"
            ),
        ),
        (Some(last_attempted), Some(last_successful)) if now - last_successful > stale_after => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!(
                "Checkouts not synced in the last {} seconds. Last successful sync: {last_successful}. Last attempted sync: {last_attempted}. Last error: {last_error}",
                stale_after.num_seconds()
            ),
        ),
        (Some(_), Some(last_successful)) => (
            StatusCode::OK,
            format!("Checkouts last successfully synced: {last_successful}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_window_scales_with_interval() {
        assert_eq!(stale_after(Duration::from_secs(3)), TimeDelta::seconds(60));
        assert_eq!(stale_after(Duration::from_secs(120)), TimeDelta::seconds(360));
    }

    #[test]
    fn health_reflects_sync_progress() {
        let status = SyncStatus::default();
        let now = Utc::now();
        let window = TimeDelta::seconds(60);

        assert_eq!(
            evaluate(&status, window, now).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        *status.last_attempted.write() = Some(now);
        *status.last_error.write() = Some("location pcloc_1 failed".to_string());
        let (code, body) = evaluate(&status, window, now);
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("pcloc_1"));

        *status.last_successful.write() = Some(now - TimeDelta::seconds(10));
        assert_eq!(evaluate(&status, window, now).0, StatusCode::OK);

        let later = now + TimeDelta::seconds(120);
        assert_eq!(
            evaluate(&status, window, later).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
