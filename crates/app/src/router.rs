use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use domain_watch_storage::Database;
use domain_watch_util::AppConfig;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::reconcile::{Clock, MissingConfig, Reconciler, Ticker};
use crate::{cron, domains, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    config: Arc<AppConfig>,
    http: reqwest::Client,
    clock: Clock,
    ticker: Ticker,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        config: AppConfig,
        http: reqwest::Client,
    ) -> Self {
        Self {
            metrics,
            storage,
            config: Arc::new(config),
            http,
            clock: Arc::new(Utc::now),
            ticker: Arc::new(Instant::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Builds a reconciler for one pass from the current configuration.
    pub fn reconciler(&self) -> Result<Reconciler, MissingConfig> {
        Ok(
            Reconciler::from_config(&self.config, self.storage.clone(), self.http.clone())?
                .with_clock(self.clock.clone())
                .with_ticker(self.ticker.clone()),
        )
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/cron/check-domains", get(cron::check_domains))
        .route("/api/domains", get(domains::list).post(domains::create))
        .route(
            "/api/domains/:name",
            axum::routing::patch(domains::update).delete(domains::remove),
        )
        .route(
            "/api/domains/:name/notifications",
            get(domains::notifications),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use url::Url;

    async fn state() -> AppState {
        setup_state(test_config(
            Url::parse("http://127.0.0.1:9/check").expect("url"),
            Url::parse("http://127.0.0.1:9/").expect("url"),
        ))
        .await
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = app_router(state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = app_router(state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn reconciler_requires_complete_config() {
        let mut state = state().await;
        assert!(state.reconciler().is_ok());

        let mut config = state.config().clone();
        config.mailer_api_key = None;
        state.config = Arc::new(config);
        let err = state.reconciler().err().expect("missing mailer key");
        assert_eq!(err.vars, vec!["MAILER_API_KEY"]);
    }
}
