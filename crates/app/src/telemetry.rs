use std::{
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use domain_watch_util::{AppConfig, Environment};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{
    BuildError as PrometheusBuildError, PrometheusBuilder, PrometheusHandle,
};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),
    #[error("failed to initialize prometheus recorder: {0}")]
    Metrics(#[from] PrometheusBuildError),
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_INSTALL_GUARD: OnceLock<Mutex<()>> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

fn build_git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("unknown")
}

/// Installs the global tracing subscriber: pretty, human-oriented output in
/// development and test, one JSON object per line in production. Filtering
/// follows `RUST_LOG`, defaulting to `info`. Safe to call more than once.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    if TRACING_INIT.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let production = matches!(config.environment, Environment::Production);

    let json_layer = production.then(|| {
        tracing_fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .json()
    });
    let pretty_layer = (!production).then(|| {
        tracing_fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .pretty()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty_layer)
        .with(json_layer)
        .try_init()
        .map_err(TelemetryError::Tracing)?;

    TRACING_INIT.set(()).ok();
    tracing::info!(
        stage = "telemetry",
        env = %config.environment.as_str(),
        version = BUILD_VERSION,
        git_sha = build_git_sha(),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the process-wide Prometheus recorder once and returns its handle;
/// later calls (one per test router) reuse the same handle. Registers the
/// descriptions of every metric the reconciliation pass and trigger emit.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let guard = METRICS_INSTALL_GUARD
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(handle) = METRICS_HANDLE.get() {
        drop(guard);
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    METRICS_HANDLE.set(handle.clone()).ok();
    drop(guard);

    describe_gauge!("app_build_info", "Build metadata for the running binary");
    describe_gauge!("app_uptime_seconds", "Seconds since the process started");
    describe_counter!(
        "reconcile_passes_total",
        "Count of reconciliation passes, labelled by result"
    );
    describe_histogram!(
        "reconcile_pass_seconds",
        "Wall-clock duration of completed reconciliation passes in seconds"
    );
    describe_counter!(
        "reconcile_skipped_total",
        "Domains left for the next pass, labelled by the limit that stopped dispatch"
    );
    describe_counter!(
        "oracle_checks_total",
        "Availability oracle calls, labelled by resulting status or error"
    );
    describe_counter!(
        "notifications_total",
        "Availability notices attempted, labelled by outcome"
    );
    describe_counter!(
        "cron_auth_failures_total",
        "Trigger requests rejected for a missing or wrong bearer token"
    );
    START_TIME.get_or_init(Instant::now);

    Ok(handle)
}

/// Prometheus text exposition for `/metrics`, with build info and uptime
/// gauges appended by hand since they are not recorded through the registry.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let mut body = handle.render();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    body.push_str("# TYPE app_build_info gauge\n");
    body.push_str(&format!(
        "app_build_info{{version=\"{}\",git=\"{}\"}} 1\n",
        BUILD_VERSION,
        build_git_sha()
    ));

    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs_f64())
        .unwrap_or_default();
    body.push_str("# TYPE app_uptime_seconds gauge\n");
    body.push_str(&format!("app_uptime_seconds {}\n", uptime));

    body
}
