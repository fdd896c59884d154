use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted availability status of a tracked domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    /// Never successfully checked.
    Unknown,
    Registered,
    Available,
}

impl DomainStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Registered => "registered",
            Self::Available => "available",
        }
    }

    /// Maps an oracle availability decision onto a persisted status.
    pub fn from_availability(available: bool) -> Self {
        if available {
            Self::Available
        } else {
            Self::Registered
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainStatus {
    type Err = InvalidDomainStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unknown" => Ok(Self::Unknown),
            "registered" => Ok(Self::Registered),
            "available" => Ok(Self::Available),
            other => Err(InvalidDomainStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid domain status: {0}")]
pub struct InvalidDomainStatus(pub String);

/// A domain name under watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedDomain {
    pub id: String,
    pub name: String,
    pub status: DomainStatus,
    pub active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a single notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationOutcome {
    Sent,
    Failed,
}

impl NotificationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for NotificationOutcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("invalid notification outcome: {other}")),
        }
    }
}

/// Append-only log entry written for every notification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub domain_id: String,
    pub sent_at: DateTime<Utc>,
    pub outcome: NotificationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
}

/// Per-domain entry of a reconciliation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainCheckResult {
    pub domain: String,
    pub status: DomainStatus,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<DomainStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DomainCheckResult {
    /// Result for a domain whose oracle call succeeded.
    ///
    /// Leaving `available` is persisted but reported as unchanged; only moves
    /// into a new status the owner cares about surface as changes.
    pub fn checked(domain: &TrackedDomain, status: DomainStatus) -> Self {
        let silent_drop = domain.status.is_available() && !status.is_available();
        let changed = status != domain.status && !silent_drop;
        Self {
            domain: domain.name.clone(),
            status,
            changed,
            previous_status: changed.then_some(domain.status),
            error: None,
        }
    }

    /// Result for a domain whose oracle call failed; the prior status is echoed back.
    pub fn failed(domain: &TrackedDomain, error: impl Into<String>) -> Self {
        Self {
            domain: domain.name.clone(),
            status: domain.status,
            changed: false,
            previous_status: None,
            error: Some(error.into()),
        }
    }

    /// `true` when this result is a fresh transition into [`DomainStatus::Available`].
    pub fn became_available(&self) -> bool {
        self.changed && self.error.is_none() && self.status.is_available()
    }
}

/// Aggregate returned by one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub available: usize,
    pub domains: Vec<DomainCheckResult>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl ReconcileSummary {
    pub fn from_results(
        domains: Vec<DomainCheckResult>,
        duration_ms: u64,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let available = domains
            .iter()
            .filter(|result| result.error.is_none() && result.status.is_available())
            .count();
        Self {
            checked: domains.len(),
            available,
            domains,
            duration_ms,
            finished_at,
        }
    }
}
