use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;
use validator::Validate;

use crate::models::{
    CohortId, CohortStatusResponse, ErrorResponse, HealthResponse, PassAcceptedResponse, PassKind,
    TriggerPassRequest,
};
use crate::services::{CacheManager, PostgresClient, QueueError, TaskQueue};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub queue: TaskQueue,
    pub cache: Arc<CacheManager>,
    pub postgres: Arc<PostgresClient>,
}

/// Configure all cohort-related routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/cohorts/{cohort_id}/matching", web::post().to(trigger_matching))
        .route("/cohorts/{cohort_id}/grouping", web::post().to(trigger_grouping))
        .route("/cohorts/{cohort_id}/status", web::get().to(cohort_status));
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let pg_healthy = state.postgres.health_check().await.unwrap_or(false);

    let status = if pg_healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// POST /api/v1/cohorts/{cohort_id}/matching
///
/// Request body (optional):
/// ```json
/// { "maxPasses": 50 }
/// ```
async fn trigger_matching(
    state: web::Data<AppState>,
    path: web::Path<CohortId>,
    body: web::Bytes,
) -> HttpResponse {
    let cohort_id = path.into_inner();
    match parse_trigger_body(&body) {
        Ok(request) => trigger(&state.queue, cohort_id, PassKind::Matching, request),
        Err(response) => response,
    }
}

/// POST /api/v1/cohorts/{cohort_id}/grouping
async fn trigger_grouping(
    state: web::Data<AppState>,
    path: web::Path<CohortId>,
    body: web::Bytes,
) -> HttpResponse {
    let cohort_id = path.into_inner();
    match parse_trigger_body(&body) {
        Ok(request) => trigger(&state.queue, cohort_id, PassKind::Grouping, request),
        Err(response) => response,
    }
}

/// An empty body runs with the configured defaults; anything else must be a valid request
fn parse_trigger_body(body: &[u8]) -> Result<TriggerPassRequest, HttpResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TriggerPassRequest::default());
    }

    let request: TriggerPassRequest = serde_json::from_slice(body).map_err(|e| {
        tracing::info!("Invalid trigger body: {}", e);
        HttpResponse::BadRequest().json(ErrorResponse {
            error: "invalid_json".to_string(),
            message: format!("Invalid JSON: {}", e),
            status_code: 400,
        })
    })?;

    if let Err(errors) = request.validate() {
        tracing::info!("Validation failed for trigger request: {:?}", errors);
        return Err(HttpResponse::BadRequest().json(ErrorResponse {
            error: "Validation failed".to_string(),
            message: errors.to_string(),
            status_code: 400,
        }));
    }

    Ok(request)
}

fn trigger(
    queue: &TaskQueue,
    cohort_id: CohortId,
    kind: PassKind,
    request: TriggerPassRequest,
) -> HttpResponse {
    match queue.submit(cohort_id, kind, request.max_passes) {
        Ok(job) => HttpResponse::Accepted().json(PassAcceptedResponse {
            job_id: job.job_id,
            cohort_id,
            kind,
            max_passes: job.max_passes,
        }),
        Err(QueueError::Full) => {
            tracing::warn!(cohort_id, %kind, "Task queue full, rejecting trigger");
            HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: "Queue full".to_string(),
                message: "Too many pending passes, try again later".to_string(),
                status_code: 503,
            })
        }
        Err(e) => {
            tracing::error!(cohort_id, %kind, "Failed to submit pass: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to submit pass".to_string(),
                message: e.to_string(),
                status_code: 500,
            })
        }
    }
}

/// GET /api/v1/cohorts/{cohort_id}/status
///
/// Latest matching and grouping reports, including how many participants remain
async fn cohort_status(state: web::Data<AppState>, path: web::Path<CohortId>) -> impl Responder {
    let cohort_id = path.into_inner();

    let matching = state.cache.latest_report(cohort_id, PassKind::Matching).await;
    let grouping = state.cache.latest_report(cohort_id, PassKind::Grouping).await;

    match (matching, grouping) {
        (Ok(matching), Ok(grouping)) => HttpResponse::Ok().json(CohortStatusResponse {
            cohort_id,
            matching,
            grouping,
        }),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(cohort_id, "Failed to read pass reports: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to read cohort status".to_string(),
                message: e.to_string(),
                status_code: 500,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_uses_defaults() {
        assert!(parse_trigger_body(b"").unwrap().max_passes.is_none());
        assert!(parse_trigger_body(b" \n").unwrap().max_passes.is_none());
        assert_eq!(parse_trigger_body(br#"{"maxPasses": 7}"#).unwrap().max_passes, Some(7));
    }

    #[test]
    fn test_malformed_bodies_are_rejected() {
        let bodies: [&[u8]; 5] = [
            br#"{"maxPasses": -1}"#,
            br#"{"maxPasses": "ten"}"#,
            b"{not json",
            br#"{"maxPasses": 0}"#,
            br#"{"maxPasses": 1001}"#,
        ];
        for body in bodies {
            let response = parse_trigger_body(body).unwrap_err();
            assert_eq!(response.status(), actix_web::http::StatusCode::BAD_REQUEST);
        }
    }
}
