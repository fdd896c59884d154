use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use domain_watch_core::{Availability, AvailabilityCode, UnrecognizedAvailabilityCode};

/// Per-request ceiling, kept under the ~10 s execution limit of the hosting
/// platform so a pass can still write results after the slowest check.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Client for the third-party domain availability oracle.
///
/// One call per check, no retries.
#[derive(Clone)]
pub struct AvailabilityClient {
    http: Client,
    endpoint: Url,
    api_key: String,
    timeout: Duration,
}

impl AvailabilityClient {
    /// Creates a new oracle client for the provided endpoint.
    pub fn new(api_key: impl Into<String>, endpoint: Url, http: Client) -> Self {
        Self {
            http,
            endpoint,
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Asks the oracle whether `domain` can be registered.
    ///
    /// `domain` must already be normalized.
    pub async fn check_availability(
        &self,
        domain: &str,
    ) -> Result<Availability, AvailabilityError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("domain", domain)
            .append_pair("apikey", &self.api_key);

        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(AvailabilityError::from_transport)?;

        let body: OracleResponse = parse_json(response).await?;
        let code = AvailabilityCode::parse(&body.available)?;
        Ok(Availability::from(code))
    }
}

#[derive(Debug, Deserialize)]
struct OracleResponse {
    available: String,
}

/// Errors produced by the availability client.
#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("oracle request timed out")]
    Timeout,
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed oracle response: {0}")]
    Decode(reqwest::Error),
    #[error(transparent)]
    UnrecognizedCode(#[from] UnrecognizedAvailabilityCode),
}

impl AvailabilityError {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }

    /// `true` for failures caused by the per-request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

async fn parse_json(response: Response) -> Result<OracleResponse, AvailabilityError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(AvailabilityError::Status { status, body });
    }

    response.json().await.map_err(|err| {
        if err.is_timeout() {
            AvailabilityError::Timeout
        } else {
            AvailabilityError::Decode(err)
        }
    })
}
