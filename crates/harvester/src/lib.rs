use anyhow::{Context, Result};
use async_trait::async_trait;
use isde_core::models::{Endpoint, HarvestAttempt, HarvestOutcome};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Upper bound on listing pages fetched per endpoint.
    pub max_pages: u32,
    pub page_size: u32,
    pub user_agent: String,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_pages: 10,
            page_size: 50,
            user_agent: concat!("isde-monitor/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HarvestSettings {
    /// Most records a single endpoint may contribute to a run.
    pub fn record_ceiling(&self) -> usize {
        self.max_pages as usize * self.page_size as usize
    }
}

/// Why an endpoint harvest stopped early. Never escapes a client: it is
/// folded into the attempt's outcome.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unusable catalog response: {0}")]
    Protocol(String),
}

impl HarvestError {
    pub fn outcome(&self) -> HarvestOutcome {
        match self {
            HarvestError::Timeout(_) => HarvestOutcome::Timeout,
            HarvestError::Status { status, .. } => HarvestOutcome::HttpError { status: *status },
            HarvestError::Connection(_) => HarvestOutcome::ConnectionError,
            HarvestError::Protocol(_) => HarvestOutcome::ProtocolError,
        }
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return HarvestError::Timeout(e.to_string());
        }
        match e.status() {
            Some(status) => HarvestError::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => HarvestError::Connection(e.to_string()),
        }
    }
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetches every record payload the endpoint exposes, up to the page
    /// ceiling. Failures are reported in the returned attempt, never raised.
    async fn harvest(&self, endpoint: &Endpoint) -> HarvestAttempt;
}

pub(crate) fn build_http_client(settings: &HarvestSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.timeout)
        .connect_timeout(settings.timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .context("Failed to build HTTP client")
}

/// GETs `url` and returns the status and body of a 2xx response.
pub(crate) async fn fetch(client: &reqwest::Client, url: &str) -> Result<(u16, String), HarvestError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(HarvestError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok((status.as_u16(), resp.text().await?))
}

pub(crate) async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, HarvestError> {
    fetch(client, url).await.map(|(_, body)| body)
}

pub(crate) fn finish(attempt: HarvestAttempt, result: Result<(), HarvestError>) -> HarvestAttempt {
    match result {
        Ok(()) => {
            tracing::info!(
                endpoint = %attempt.endpoint_id,
                records = attempt.raw_payloads.len(),
                not_checked = attempt.not_checked.len(),
                pages = attempt.pages_fetched,
                "Harvest succeeded"
            );
            attempt
        }
        Err(e) => {
            tracing::warn!(
                endpoint = %attempt.endpoint_id,
                partial_records = attempt.raw_payloads.len(),
                error = %e,
                "Harvest failed"
            );
            let outcome = e.outcome();
            attempt.failed(outcome, e.to_string())
        }
    }
}

pub mod csw;
pub mod local;
pub mod network;
pub mod sitemap;
