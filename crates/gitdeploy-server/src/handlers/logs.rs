//! `GET /api/admin/logs/:id?since=`: full job detail, log entries filtered
//! to those after `since`. `:id` is accepted as either a URL-safe `RefId`
//! (active/pending) or `RevId` (recent) — both are just base64url over the
//! same kind of string, so the raw path segment is decoded both ways and
//! `Registry::find` picks whichever map actually has it.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use gitdeploy_types::{Job, UrlSafeRefId, UrlSafeRevId};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SinceQuery {
    #[serde(default)]
    since: Option<f64>,
}

pub async fn get_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<SinceQuery>,
) -> Result<Json<Job>, AppError> {
    let ref_id = UrlSafeRefId(id.clone())
        .decode()
        .map_err(AppError::from)?;
    let rev_id = UrlSafeRevId(id)
        .decode()
        .map_err(AppError::from)?;

    let mut job = state
        .engine
        .find(&ref_id, &rev_id)
        .await
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "E_QUERY", "no matching job"))?;

    if let Some(since) = q.since {
        let cutoff = super::jobs::since_to_datetime(since);
        job.logs.retain(|entry| entry.timestamp > cutoff);
    }

    Ok(Json(job))
}
