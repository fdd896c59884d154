//! The reconciliation pass: re-check every active domain against the oracle,
//! persist what changed, and notify on fresh registered/unknown → available
//! transitions.
//!
//! Checks run as one task per domain. Dispatch stops early once the soft
//! deadline or the per-pass oracle quota is exhausted; skipped domains keep
//! their `last_checked_at` and therefore sort first on the next pass. Tasks
//! already running are always awaited.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use domain_watch_core::{
    DomainCheckResult, DomainStatus, ReconcileSummary, SlidingWindow, SoftDeadline, TrackedDomain,
};
use domain_watch_providers::{AvailabilityClient, MailerClient};
use domain_watch_storage::{Database, TrackedDomainError};
use domain_watch_util::AppConfig;

use crate::notifier::Notifier;

/// Budget after which no further checks are dispatched.
pub const SOFT_DEADLINE: Duration = Duration::from_secs(9);
const ORACLE_QUOTA_WINDOW: Duration = Duration::from_secs(60);

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
pub type Ticker = Arc<dyn Fn() -> Instant + Send + Sync>;

#[derive(Clone)]
pub struct Reconciler {
    database: Database,
    oracle: AvailabilityClient,
    notifier: Notifier,
    clock: Clock,
    ticker: Ticker,
    soft_deadline: Duration,
    oracle_quota: usize,
}

impl Reconciler {
    pub fn new(database: Database, oracle: AvailabilityClient, notifier: Notifier) -> Self {
        Self {
            database,
            oracle,
            notifier,
            clock: Arc::new(Utc::now),
            ticker: Arc::new(Instant::now),
            soft_deadline: SOFT_DEADLINE,
            oracle_quota: domain_watch_util::config::DEFAULT_ORACLE_REQUESTS_PER_MINUTE as usize,
        }
    }

    /// Wires the outbound clients from configuration, failing with the list of
    /// unset variables when anything a pass needs is missing.
    pub fn from_config(
        config: &AppConfig,
        database: Database,
        http: reqwest::Client,
    ) -> Result<Self, MissingConfig> {
        let (Some(oracle_key), Some(oracle_url), Some(mailer_key), Some(recipient)) = (
            config.oracle_api_key.as_deref(),
            config.oracle_base_url.clone(),
            config.mailer_api_key.as_deref(),
            config.notify_email.as_deref(),
        ) else {
            // The cron secret guards the HTTP trigger only; a pass runs without it.
            let vars = config
                .missing_reconcile_vars()
                .into_iter()
                .filter(|name| *name != "CRON_SECRET")
                .collect();
            return Err(MissingConfig { vars });
        };

        let oracle = AvailabilityClient::new(oracle_key, oracle_url, http.clone());
        let mailer = MailerClient::new(mailer_key, config.mailer_base_url.clone(), http);
        let notifier = Notifier::new(mailer, database.clone(), recipient, &config.notify_from);

        Ok(Self::new(database, oracle, notifier)
            .with_oracle_quota(config.oracle_requests_per_minute as usize))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ticker(mut self, ticker: Ticker) -> Self {
        self.ticker = ticker;
        self
    }

    pub fn with_oracle_quota(mut self, requests_per_window: usize) -> Self {
        self.oracle_quota = requests_per_window;
        self
    }

    #[cfg(test)]
    pub fn with_soft_deadline(mut self, budget: Duration) -> Self {
        self.soft_deadline = budget;
        self
    }

    /// Runs one pass. Only a failure to load the domain list is returned as
    /// an error; per-domain failures are reported inside the summary.
    pub async fn run(&self) -> Result<ReconcileSummary, ReconcileError> {
        let started = (self.ticker)();
        let deadline = SoftDeadline::new(started, self.soft_deadline);

        let domains = self
            .database
            .tracked_domains()
            .list_active_by_staleness()
            .await
            .map_err(|err| {
                counter!("reconcile_passes_total", "result" => "error").increment(1);
                ReconcileError::LoadDomains(err)
            })?;
        let total = domains.len();
        info!(stage = "reconcile", domains = total, "reconciliation pass started");

        let mut quota = SlidingWindow::new(self.oracle_quota, ORACLE_QUOTA_WINDOW);
        let mut tasks = JoinSet::new();
        for (index, domain) in domains.into_iter().enumerate() {
            let now = (self.ticker)();
            let skip_reason = if deadline.is_exceeded(now) {
                Some("deadline")
            } else if !quota.try_acquire(now) {
                Some("quota")
            } else {
                None
            };
            if let Some(reason) = skip_reason {
                let skipped = total - index;
                counter!("reconcile_skipped_total", "reason" => reason).increment(skipped as u64);
                warn!(
                    stage = "reconcile",
                    reason,
                    skipped,
                    elapsed_ms = deadline.elapsed(now).as_millis() as u64,
                    "dispatch stopped; remaining domains deferred to the next pass"
                );
                break;
            }

            let check = self.domain_check();
            tasks.spawn(check.run(domain));
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!(stage = "reconcile", error = %err, "domain check task aborted"),
            }
        }

        let finished = (self.ticker)();
        let elapsed = finished.saturating_duration_since(started);
        let summary =
            ReconcileSummary::from_results(results, elapsed.as_millis() as u64, (self.clock)());

        counter!("reconcile_passes_total", "result" => "ok").increment(1);
        histogram!("reconcile_pass_seconds").record(elapsed.as_secs_f64());
        info!(
            stage = "reconcile",
            checked = summary.checked,
            available = summary.available,
            duration_ms = summary.duration_ms,
            oracle_quota_left = quota.remaining(finished),
            "reconciliation pass finished"
        );
        Ok(summary)
    }

    fn domain_check(&self) -> DomainCheck {
        DomainCheck {
            database: self.database.clone(),
            oracle: self.oracle.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Everything one per-domain task needs, owned so the task can be spawned.
struct DomainCheck {
    database: Database,
    oracle: AvailabilityClient,
    notifier: Notifier,
    clock: Clock,
}

impl DomainCheck {
    async fn run(self, domain: TrackedDomain) -> DomainCheckResult {
        let availability = match self.oracle.check_availability(&domain.name).await {
            Ok(availability) => availability,
            Err(err) => {
                counter!("oracle_checks_total", "result" => "error").increment(1);
                warn!(
                    stage = "oracle",
                    domain = %domain.name,
                    timeout = err.is_timeout(),
                    error = %err,
                    "availability check failed; domain left unchanged"
                );
                return DomainCheckResult::failed(&domain, err.to_string());
            }
        };

        let status = DomainStatus::from_availability(availability.available);
        counter!("oracle_checks_total", "result" => status.as_str()).increment(1);
        let result = DomainCheckResult::checked(&domain, status);

        let checked_at = (self.clock)();
        if let Err(err) = self
            .database
            .tracked_domains()
            .update_status(&domain.id, status, checked_at)
            .await
        {
            // The summary still reports the computed status. Skipping the
            // notice lets the next pass see the same edge and notify then.
            error!(
                stage = "storage",
                domain = %domain.name,
                status = %status,
                error = %err,
                "failed to persist check result"
            );
            return result;
        }

        if status != domain.status {
            info!(
                stage = "reconcile",
                domain = %domain.name,
                previous = %domain.status,
                status = %status,
                code = availability.code.as_str(),
                "domain status changed"
            );
        }

        if result.became_available() {
            let transitioned = TrackedDomain {
                status,
                last_checked_at: Some(checked_at),
                updated_at: checked_at,
                ..domain
            };
            self.notifier.notify(&transitioned, checked_at).await;
        }

        result
    }
}

/// Configuration a pass needs but that is not set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing required configuration: {}", .vars.join(", "))]
pub struct MissingConfig {
    pub vars: Vec<&'static str>,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to load tracked domains: {0}")]
    LoadDomains(#[source] TrackedDomainError),
}
