use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::SecondsFormat;
use metrics::counter;
use serde::Serialize;
use tracing::{error, warn};

use domain_watch_core::{DomainCheckResult, ReconcileSummary};

use crate::{auth, router::AppState};

#[derive(Debug, Serialize)]
struct PassResponse {
    success: bool,
    checked: usize,
    available: usize,
    domains: Vec<DomainCheckResult>,
    duration: u64,
    timestamp: String,
}

impl From<ReconcileSummary> for PassResponse {
    fn from(summary: ReconcileSummary) -> Self {
        Self {
            success: true,
            checked: summary.checked,
            available: summary.available,
            domains: summary.domains,
            duration: summary.duration_ms,
            timestamp: summary
                .finished_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureResponse {
    success: bool,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_vars: Option<Vec<&'static str>>,
}

fn failure(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    let body = FailureResponse {
        success: false,
        error,
        message: message.into(),
        missing_vars: None,
    };
    (status, Json(body)).into_response()
}

fn configuration_failure(missing: Vec<&'static str>) -> Response {
    let body = FailureResponse {
        success: false,
        error: "ConfigurationError",
        message: format!("missing required configuration: {}", missing.join(", ")),
        missing_vars: Some(missing),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// `GET /api/cron/check-domains`: runs one reconciliation pass for the external scheduler.
///
/// Configuration is checked before the caller is authenticated so that a
/// deployment without a secret fails loudly instead of answering 401 forever.
pub async fn check_domains(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let missing = state.config().missing_reconcile_vars();
    let Some(secret) = state.config().cron_secret.as_deref().filter(|_| missing.is_empty()) else {
        error!(stage = "cron", missing = ?missing, "trigger rejected: configuration incomplete");
        return configuration_failure(missing);
    };

    if let Err(err) = auth::authorize(&headers, secret) {
        counter!("cron_auth_failures_total").increment(1);
        warn!(stage = "cron", reason = err.message(), "trigger rejected");
        return failure(StatusCode::UNAUTHORIZED, "Unauthorized", err.message());
    }

    let reconciler = match state.reconciler() {
        Ok(reconciler) => reconciler,
        Err(err) => return configuration_failure(err.vars),
    };

    match reconciler.run().await {
        Ok(summary) => (StatusCode::OK, Json(PassResponse::from(summary))).into_response(),
        Err(err) => {
            error!(stage = "cron", error = %err, "reconciliation pass failed");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "StorageError",
                err.to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use domain_watch_core::DomainStatus;
    use domain_watch_storage::NewTrackedDomain;
    use http_body_util::BodyExt;
    use httpmock::prelude::*;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use url::Url;

    use crate::router::{
        app_router,
        test_support::{fixed_now, setup_state, test_config, CRON_SECRET},
        AppState,
    };

    struct TestContext {
        state: AppState,
        app: Router,
        oracle: MockServer,
        mailer: MockServer,
    }

    async fn setup_context() -> TestContext {
        let oracle = MockServer::start_async().await;
        let mailer = MockServer::start_async().await;
        let config = test_config(
            Url::parse(&oracle.url("/check")).expect("url"),
            Url::parse(&mailer.url("/")).expect("url"),
        );
        let state = setup_state(config).await;
        TestContext {
            app: app_router(state.clone()),
            state,
            oracle,
            mailer,
        }
    }

    async fn seed(state: &AppState, name: &str) {
        state
            .storage()
            .tracked_domains()
            .insert(NewTrackedDomain {
                name,
                active: true,
                created_at: fixed_now(),
            })
            .await
            .expect("seed");
    }

    async fn call(app: Router, method: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri("/api/cron/check-domains");
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .expect("handler should respond");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    #[tokio::test]
    async fn runs_pass_and_reports_summary() {
        let ctx = setup_context().await;
        seed(&ctx.state, "fresh.io").await;
        ctx.oracle
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/check")
                    .query_param("domain", "fresh.io")
                    .query_param("apikey", "oracle-key");
                then.status(200).json_body(json!({ "available": "true" }));
            })
            .await;
        let mail = ctx
            .mailer
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/emails")
                    .header("authorization", "Bearer mail-key");
                then.status(200).json_body(json!({ "id": "msg-7" }));
            })
            .await;

        let (status, body) = call(ctx.app, "GET", Some(CRON_SECRET)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["checked"], json!(1));
        assert_eq!(body["available"], json!(1));
        assert_eq!(body["timestamp"], json!("2024-01-01T00:00:00.000Z"));
        assert!(body["duration"].is_u64());
        assert_eq!(
            body["domains"],
            json!([{
                "domain": "fresh.io",
                "status": "available",
                "changed": true,
                "previousStatus": "unknown"
            }])
        );
        mail.assert_hits_async(1).await;

        let stored = ctx
            .state
            .storage()
            .tracked_domains()
            .fetch_by_name("fresh.io")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(stored.status, DomainStatus::Available);
    }

    #[tokio::test]
    async fn rejects_missing_and_wrong_tokens_without_side_effects() {
        let ctx = setup_context().await;
        seed(&ctx.state, "fresh.io").await;
        let oracle = ctx
            .oracle
            .mock_async(|when, then| {
                when.any_request();
                then.status(200).json_body(json!({ "available": "true" }));
            })
            .await;

        for token in [None, Some("wrong-secret")] {
            let (status, body) = call(ctx.app.clone(), "GET", token).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["success"], json!(false));
            assert_eq!(body["error"], json!("Unauthorized"));
        }

        oracle.assert_hits_async(0).await;
        let stored = ctx
            .state
            .storage()
            .tracked_domains()
            .fetch_by_name("fresh.io")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(stored.status, DomainStatus::Unknown);
        assert!(stored.last_checked_at.is_none());
    }

    #[tokio::test]
    async fn reports_missing_configuration_before_auth() {
        let oracle = MockServer::start_async().await;
        let mut config = test_config(
            Url::parse(&oracle.url("/check")).expect("url"),
            Url::parse(&oracle.url("/")).expect("url"),
        );
        config.cron_secret = None;
        config.notify_email = None;
        let app = app_router(setup_state(config).await);

        let (status, body) = call(app, "GET", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], json!("ConfigurationError"));
        assert_eq!(body["missingVars"], json!(["CRON_SECRET", "NOTIFY_EMAIL"]));
    }

    #[tokio::test]
    async fn other_methods_are_not_allowed() {
        let ctx = setup_context().await;

        let (status, _) = call(ctx.app, "POST", Some(CRON_SECRET)).await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn empty_domain_list_yields_empty_summary() {
        let ctx = setup_context().await;

        let (status, body) = call(ctx.app, "GET", Some(CRON_SECRET)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checked"], json!(0));
        assert_eq!(body["available"], json!(0));
        assert_eq!(body["domains"], json!([]));
    }

    #[tokio::test]
    async fn load_failure_returns_storage_error() {
        let ctx = setup_context().await;
        sqlx::query("DROP TABLE notification_log")
            .execute(ctx.state.storage().pool())
            .await
            .expect("drop log");
        sqlx::query("DROP TABLE tracked_domains")
            .execute(ctx.state.storage().pool())
            .await
            .expect("drop domains");

        let (status, body) = call(ctx.app, "GET", Some(CRON_SECRET)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("StorageError"));
    }
}
