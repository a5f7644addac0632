//! `GET /api/admin/jobs` and `POST /api/admin/jobs` (the kill request).

use axum::extract::{Query, State};
use axum::Json;
use chrono::{TimeZone, Utc};
use gitdeploy_types::{Job, RefId};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SinceQuery {
    since: f64,
}

#[derive(Serialize)]
pub struct JobsResponse {
    success: bool,
    jobs: Vec<Job>,
}

pub(crate) fn since_to_datetime(since: f64) -> chrono::DateTime<Utc> {
    let secs = since.trunc() as i64;
    let nanos = ((since.fract()) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now)
}

pub async fn list_jobs(State(state): State<AppState>, Query(q): Query<SinceQuery>) -> Json<JobsResponse> {
    let jobs = state.engine.jobs_since(since_to_datetime(q.since)).await;
    Json(JobsResponse { success: true, jobs })
}

#[derive(Deserialize)]
pub struct KillRequest {
    job_id: String,
    #[serde(default)]
    kill: bool,
}

#[derive(Serialize)]
pub struct KillResponse {
    success: bool,
}

/// Decodes `job_id`. If `kill` is set and the ref is present in either
/// `Active` or `Pending`, forwards it to the engine's kill channel;
/// otherwise answers `200 {success: false}` without touching the engine.
pub async fn request_kill(
    State(state): State<AppState>,
    Json(req): Json<KillRequest>,
) -> Result<Json<KillResponse>, AppError> {
    let ref_id: RefId = gitdeploy_types::UrlSafeRefId(req.job_id)
        .decode()
        .map_err(AppError::from)?;

    if !req.kill {
        return Ok(Json(KillResponse { success: true }));
    }

    let known = {
        let registry = state.engine.registry.lock().await;
        registry.is_active(&ref_id) || registry.is_pending(&ref_id)
    };
    if !known {
        return Ok(Json(KillResponse { success: false }));
    }

    let _ = state.engine.kill_tx.send(ref_id).await;
    Ok(Json(KillResponse { success: true }))
}
