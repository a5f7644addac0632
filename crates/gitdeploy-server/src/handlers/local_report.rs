//! `POST /api/local/jobs/:id?format=pytest|gitdeploy`: the callback a
//! running deploy script hits to attach a test report to its own job.

use axum::extract::{Path, Query, State};
use axum::Json;
use gitdeploy_types::{Report, UrlSafeRefId};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::pytest::{pytest_to_report, PytestResult};
use crate::state::AppState;

#[derive(Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Gitdeploy,
    Pytest,
}

#[derive(Deserialize)]
pub struct FormatQuery {
    #[serde(default)]
    format: Format,
}

#[derive(Serialize)]
pub struct LocalReportResponse {
    success: bool,
}

pub async fn post_report(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(q): Query<FormatQuery>,
    body: axum::body::Bytes,
) -> Result<Json<LocalReportResponse>, AppError> {
    let url_safe_ref_id = UrlSafeRefId(job_id);

    let report: Report = match q.format {
        Format::Pytest => {
            let pyresult: PytestResult = serde_json::from_slice(&body)
                .map_err(|e| AppError::new(axum::http::StatusCode::BAD_REQUEST, "E_PARSE", e.to_string()))?;
            pytest_to_report(pyresult)
        }
        Format::Gitdeploy => serde_json::from_slice(&body)
            .map_err(|e| AppError::new(axum::http::StatusCode::BAD_REQUEST, "E_PARSE", e.to_string()))?,
    };

    state.engine.set_report(&url_safe_ref_id, report).await.map_err(AppError::from)?;

    Ok(Json(LocalReportResponse { success: true }))
}
