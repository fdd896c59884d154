use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Per-request ceiling for a send. A notice is attempted after the oracle
/// call of the same domain, so this has to fit in what is left of the ~10 s
/// platform limit; a timed-out send is logged as a failed attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the transactional email HTTP API.
#[derive(Clone)]
pub struct MailerClient {
    http: Client,
    base_url: Url,
    api_key: String,
    timeout: Duration,
}

impl MailerClient {
    /// Creates a new mailer client; `base_url` must end with a slash.
    pub fn new(api_key: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Submits one message and returns the provider-assigned id.
    pub async fn send(&self, message: &EmailMessage<'_>) -> Result<SentEmail, MailerError> {
        let url = self.base_url.join("emails")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(message)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(MailerError::from_transport)?;

        parse_json(response).await
    }
}

/// Outgoing message payload.
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage<'a> {
    pub from: &'a str,
    pub to: Vec<&'a str>,
    pub subject: String,
    pub html: String,
}

/// Provider acknowledgement for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SentEmail {
    pub id: String,
}

/// Errors produced by the mailer client.
#[derive(Debug, Error)]
pub enum MailerError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("mailer request timed out")]
    Timeout,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl MailerError {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

async fn parse_json(response: Response) -> Result<SentEmail, MailerError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(MailerError::Status { status, body });
    }

    Ok(response.json().await?)
}
