//! Maps [`EngineError`] to the `{success, code, message, detail}` body shape
//! every admin and local-report endpoint answers with on failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gitdeploy_types::EngineError;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    detail: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::TransientFs(_) | EngineError::DoubleInit => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = match &e {
            EngineError::NotFound(_) => "E_QUERY",
            EngineError::InvalidInput(_) => "E_PARSE",
            EngineError::TransientFs(_) | EngineError::DoubleInit => "E_SERVER",
        };
        Self::new(status, code, e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            code: self.code,
            message: self.message,
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}
