//! HTTP handlers for the REST API.
//!
//! Each handler corresponds to an API endpoint and delegates to the
//! [`JobRunner`](crate::services::JobRunner) for the actual work.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;

use super::dto::{
    CacheClearResponse, CacheStatsResponse, CancelResponse, HealthResponse, JobSnapshot,
    JobStatusResponse, SubmitQuery, SubmitResponse,
};
use super::error::AppError;
use super::state::AppState;
use crate::services::FetchOutcome;

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<T>, AppError>;

// =============================================================================
// Health Check
// =============================================================================

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> HandlerResult<HealthResponse> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: "v1".to_string(),
        jobs: state.runner.tracker().len(),
    }))
}

// =============================================================================
// Jobs
// =============================================================================

/// POST /v1/jobs
///
/// The request body is the archive itself; options come from the query
/// string. Returns a job ID for tracking progress.
pub async fn submit_job(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Request body must contain an archive".to_string()));
    }
    let options = query
        .into_options(state.config.job_defaults())
        .map_err(AppError::BadRequest)?;

    let job_id = state.runner.submit(body.to_vec(), options)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job_id.clone(),
            message: format!("Cube assembly started. Track progress at /v1/jobs/{}", job_id),
        }),
    ))
}

/// GET /v1/jobs/{job_id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> HandlerResult<JobStatusResponse> {
    let snapshot = state
        .runner
        .poll(&job_id)
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;
    let logs = state.runner.tracker().get_logs(&job_id);
    Ok(Json(JobStatusResponse { snapshot, logs }))
}

/// GET /v1/jobs/{job_id}/result
///
/// 200 with the cube once the job is done, 202 with the current snapshot
/// while it is still queued or running.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    match state.runner.fetch(&job_id) {
        FetchOutcome::Ready(payload) => Ok(Json(payload.as_ref()).into_response()),
        FetchOutcome::Pending(snapshot) => Ok((StatusCode::ACCEPTED, Json(snapshot)).into_response()),
        FetchOutcome::Failed(snapshot) => Err(AppError::JobFailed(snapshot)),
        FetchOutcome::NotFound => Err(AppError::NotFound(format!("Job {} not found", job_id))),
    }
}

/// DELETE /v1/jobs/{job_id}
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> HandlerResult<CancelResponse> {
    if state.runner.poll(&job_id).is_none() {
        return Err(AppError::NotFound(format!("Job {} not found", job_id)));
    }
    let cancelled = state.runner.cancel(&job_id);
    Ok(Json(CancelResponse { job_id, cancelled }))
}

/// GET /v1/jobs/{job_id}/events
///
/// Server-Sent Events: a `progress` event whenever the snapshot changes, a
/// `log` event per new log line, and a final `complete` event.
pub async fn stream_job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if state.runner.poll(&job_id).is_none() {
        return Err(AppError::NotFound(format!("Job {} not found", job_id)));
    }

    let runner = state.runner.clone();
    let stream = async_stream::stream! {
        let mut last_log_count = 0;
        let mut last_snapshot: Option<JobSnapshot> = None;
        loop {
            let Some(snapshot) = runner.poll(&job_id) else {
                break;
            };

            let logs = runner.tracker().get_logs(&job_id);
            for log in logs.iter().skip(last_log_count) {
                let data = serde_json::to_string(log).unwrap_or_default();
                yield Ok(Event::default().event("log").data(data));
            }
            last_log_count = logs.len();

            if last_snapshot.as_ref() != Some(&snapshot) {
                let data = serde_json::to_string(&snapshot).unwrap_or_default();
                yield Ok(Event::default().event("progress").data(data));
            }

            if snapshot.status.is_terminal() {
                let final_event = serde_json::json!({
                    "status": snapshot.status,
                    "error_kind": snapshot.error_kind,
                    "message": snapshot.message,
                    "result": format!("/v1/jobs/{}/result", job_id),
                });
                yield Ok(Event::default()
                    .event("complete")
                    .data(serde_json::to_string(&final_event).unwrap_or_default()));
                break;
            }
            last_snapshot = Some(snapshot);

            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(1))
            .text("keep-alive"),
    ))
}

// =============================================================================
// Cache
// =============================================================================

/// GET /v1/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> HandlerResult<CacheStatsResponse> {
    let stats = state.runner.cache().map(|cache| cache.stats());
    Ok(Json(CacheStatsResponse::from_stats(stats)))
}

/// DELETE /v1/cache
pub async fn clear_cache(State(state): State<AppState>) -> HandlerResult<CacheClearResponse> {
    let removed = state.runner.cache().map_or(0, |cache| cache.clear());
    tracing::info!(removed, "result cache cleared");
    Ok(Json(CacheClearResponse { removed }))
}
