//! Bearer-authenticated management of the tracked domain list.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{error, info, warn};

use domain_watch_core::{
    is_valid_domain_name, normalize_domain_name, NotificationRecord, TrackedDomain,
};
use domain_watch_storage::{NewTrackedDomain, TrackedDomainError};

use crate::{auth, problem::ProblemResponse, router::AppState};

#[derive(Debug, Deserialize)]
pub struct CreateDomainRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDomainRequest {
    active: bool,
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ProblemResponse> {
    let Some(secret) = state.config().cron_secret.as_deref() else {
        error!(stage = "api", "management API called without CRON_SECRET configured");
        return Err(ProblemResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "configuration_error",
            "CRON_SECRET is not configured",
        ));
    };
    auth::authorize(headers, secret).map_err(|err| {
        warn!(stage = "api", reason = err.message(), "management request rejected");
        ProblemResponse::new(StatusCode::UNAUTHORIZED, "unauthorized", err.message())
    })
}

async fn find_domain(state: &AppState, raw_name: &str) -> Result<TrackedDomain, ProblemResponse> {
    let name = normalize_domain_name(raw_name);
    state
        .storage()
        .tracked_domains()
        .fetch_by_name(&name)
        .await
        .map_err(|err| {
            error!(stage = "api", domain = %name, error = %err, "failed to load domain");
            ProblemResponse::storage(err)
        })?
        .ok_or_else(|| ProblemResponse::not_found(format!("{name} is not tracked")))
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<TrackedDomain>>, ProblemResponse> {
    require_admin(&state, &headers)?;
    let domains = state
        .storage()
        .tracked_domains()
        .list_all()
        .await
        .map_err(ProblemResponse::storage)?;
    Ok(Json(domains))
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateDomainRequest>,
) -> Result<Response, ProblemResponse> {
    require_admin(&state, &headers)?;

    let name = normalize_domain_name(&body.name);
    if !is_valid_domain_name(&name) {
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_domain",
            format!("{:?} is not a valid domain name", body.name),
        ));
    }

    let domain = state
        .storage()
        .tracked_domains()
        .insert(NewTrackedDomain {
            name: &name,
            active: true,
            created_at: state.now(),
        })
        .await
        .map_err(|err| match err {
            TrackedDomainError::Duplicate => ProblemResponse::new(
                StatusCode::CONFLICT,
                "duplicate_domain",
                format!("{name} is already tracked"),
            ),
            other => ProblemResponse::storage(other),
        })?;

    info!(stage = "api", domain = %domain.name, "domain tracked");
    Ok((StatusCode::CREATED, Json(domain)).into_response())
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<UpdateDomainRequest>,
) -> Result<Json<TrackedDomain>, ProblemResponse> {
    require_admin(&state, &headers)?;
    let domain = find_domain(&state, &name).await?;

    let now = state.now();
    state
        .storage()
        .tracked_domains()
        .set_active(&domain.id, body.active, now)
        .await
        .map_err(|err| match err {
            TrackedDomainError::NotFound => {
                ProblemResponse::not_found(format!("{} is not tracked", domain.name))
            }
            other => ProblemResponse::storage(other),
        })?;

    info!(stage = "api", domain = %domain.name, active = body.active, "domain updated");
    Ok(Json(TrackedDomain {
        active: body.active,
        updated_at: now,
        ..domain
    }))
}

pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    require_admin(&state, &headers)?;
    let name = normalize_domain_name(&name);

    match state.storage().tracked_domains().delete_by_name(&name).await {
        Ok(()) => {
            info!(stage = "api", domain = %name, "domain untracked");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(TrackedDomainError::NotFound) => {
            Err(ProblemResponse::not_found(format!("{name} is not tracked")))
        }
        Err(err) => Err(ProblemResponse::storage(err)),
    }
}

pub async fn notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Vec<NotificationRecord>>, ProblemResponse> {
    require_admin(&state, &headers)?;
    let domain = find_domain(&state, &name).await?;

    let records = state
        .storage()
        .notification_log()
        .list_for_domain(&domain.id)
        .await
        .map_err(ProblemResponse::storage)?;
    Ok(Json(records))
}
