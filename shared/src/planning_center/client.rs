use crate::PlanningCenterConfig;
use crate::planning_center::api::{CheckInsPage, JSON_API_MEDIA_TYPE, LocationDocument};
use crate::planning_center::{
    Checkout, MAX_PAGES, MAX_PER_PAGE, SourceClient, SourceError, SourceLocation, order_hierarchy,
    validate_fetch_bounds,
};
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Network client for the Planning Center Check-Ins API.
#[derive(Clone, Debug)]
pub struct PlanningCenterClient {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl PlanningCenterClient {
    pub fn new(config: &PlanningCenterConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let credentials = config.client_id.clone().zip(config.client_secret.clone());
        Ok(Self::new_with_client(client, &config.base_url, credentials))
    }

    pub fn new_with_client(
        client: Client,
        base_url: &str,
        credentials: Option<(String, String)>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn location_url(&self, location_id: &str) -> String {
        format!("{}/check-ins/v2/locations/{location_id}", self.base_url)
    }

    /// Sends the request, racing it against `cancel`, and returns the status with the
    /// raw body.
    async fn send(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, String), SourceError> {
        let mut request = request.header(ACCEPT, JSON_API_MEDIA_TYPE);
        if let Some((id, secret)) = &self.credentials {
            request = request.basic_auth(id, Some(secret));
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        tokio::select! {
            res = exchange => Ok(res?),
            () = cancel.cancelled() => Err(SourceError::Cancelled),
        }
    }
}

fn check_status(status: StatusCode, body: String) -> Result<String, SourceError> {
    if status.is_server_error() {
        Err(SourceError::Server {
            status: status.as_u16(),
            body,
        })
    } else if status.is_client_error() {
        Err(SourceError::Client {
            status: status.as_u16(),
            body,
        })
    } else {
        Ok(body)
    }
}

impl SourceClient for PlanningCenterClient {
    #[instrument(skip(self, cancel))]
    async fn fetch_checkouts(
        &self,
        location_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Checkout>, SourceError> {
        validate_fetch_bounds(since, limit)?;

        let mut query = vec![
            ("filter", "checked_out".to_string()),
            ("order", "-checked_out_at".to_string()),
        ];
        if limit > 0 {
            query.push(("per_page", limit.min(MAX_PER_PAGE).to_string()));
        }

        let mut checkouts = Vec::new();
        let mut request = self
            .client
            .get(format!("{}/check_ins", self.location_url(location_id)))
            .query(&query);

        for page in 1..=MAX_PAGES {
            let (status, body) = self.send(request, cancel).await?;
            if status == StatusCode::NOT_FOUND {
                debug!(page, "check-ins not found, ending pagination");
                break;
            }
            let body = check_status(status, body)?;
            let decoded: CheckInsPage = serde_json::from_str(&body)?;
            debug!(page, count = decoded.data.len(), "fetched check-ins page");

            for resource in decoded.data {
                let checkout = Checkout::from(resource);
                // Everything from here on is older and was ingested by an earlier sync
                if let (Some(since), Some(checked_out_at)) = (since, checkout.checked_out_at)
                    && checked_out_at < since
                {
                    return Ok(checkouts);
                }
                checkouts.push(checkout);
                if limit > 0 && checkouts.len() >= limit {
                    return Ok(checkouts);
                }
            }

            match decoded.links.next {
                Some(next) if !next.is_empty() => request = self.client.get(next),
                _ => break,
            }
        }

        Ok(checkouts)
    }

    #[instrument(skip(self, cancel))]
    async fn fetch_location_hierarchy(
        &self,
        location_id: &str,
        include_descendants: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceLocation>, SourceError> {
        let mut request = self.client.get(self.location_url(location_id));
        if include_descendants {
            request = request.query(&[("include", "locations")]);
        }

        let (status, body) = self.send(request, cancel).await?;
        let body = check_status(status, body)?;
        let document: LocationDocument = serde_json::from_str(&body)?;

        let primary = SourceLocation::from(document.data);
        let included = document.included.into_iter().map(SourceLocation::from);
        Ok(order_hierarchy(std::iter::once(primary).chain(included)))
    }
}
