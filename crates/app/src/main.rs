mod auth;
mod cron;
mod domains;
mod notifier;
mod problem;
mod reconcile;
mod router;
mod scheduler;
mod telemetry;

use std::{net::SocketAddr, time::Duration};

use domain_watch_storage::Database;
use domain_watch_util::{load_env_file, AppConfig};
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;

    let missing = config.missing_reconcile_vars();
    if !missing.is_empty() {
        warn!(stage = "app", missing = ?missing, "reconciliation is not fully configured");
    }

    let state = router::AppState::new(metrics, database, config.clone(), http);

    if let Some(period) = config.reconcile_interval {
        match state.reconciler() {
            Ok(reconciler) => {
                info!(
                    stage = "scheduler",
                    interval_secs = period.as_secs(),
                    "starting in-process reconciliation"
                );
                scheduler::ReconcileWorker::new(reconciler, period).spawn();
            }
            Err(err) => {
                warn!(stage = "scheduler", error = %err, "in-process reconciliation disabled")
            }
        }
    }

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
