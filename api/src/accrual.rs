//! Client for the external accrual service.

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use rust_decimal::Decimal;
use serde::Deserialize;

use payloads::OrderStatus;

/// Status vocabulary of the accrual service. `Registered` means the order
/// is known upstream but not yet scored; on our side it reads as
/// `Processing`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            AccrualStatus::Registered | AccrualStatus::Processing => {
                OrderStatus::Processing
            }
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Body of a `200` accrual response.
#[derive(Debug, Clone, Deserialize)]
pub struct AccrualOrder {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub accrual: Option<Decimal>,
}

/// One poll against the accrual service, classified per the upstream
/// status-code contract.
#[derive(Debug)]
pub enum PollOutcome {
    /// `200`: the service has data for the order, possibly non-terminal.
    Ready(AccrualOrder),
    /// `204`: the service has never seen the order. It may appear later.
    Unknown,
    /// `429`, with the `Retry-After` seconds when present and parseable.
    RateLimited(Option<u64>),
    /// `500`.
    UpstreamError,
    /// Anything else.
    Other(StatusCode),
}

pub struct AccrualClient {
    base_url: String,
    http: reqwest::Client,
}

impl AccrualClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// `GET {base}/api/orders/{number}`.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, number: i64) -> anyhow::Result<PollOutcome> {
        let url = format!("{}/api/orders/{}", self.base_url, number);
        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(PollOutcome::Ready(response.json().await?)),
            StatusCode::NO_CONTENT => Ok(PollOutcome::Unknown),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok());
                Ok(PollOutcome::RateLimited(parse_retry_after(retry_after)))
            }
            StatusCode::INTERNAL_SERVER_ERROR => Ok(PollOutcome::UpstreamError),
            other => Ok(PollOutcome::Other(other)),
        }
    }
}

/// Whole seconds from a `Retry-After` header value, if parseable.
fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value?.trim().parse().ok()
}
