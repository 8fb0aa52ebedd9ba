use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{worst, ApiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

/// The `{status, errors, output}` body every endpoint answers with
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: Status,
    pub errors: Vec<String>,
    pub output: Value,
    #[serde(skip)]
    pub status_code: StatusCode,
}

impl ApiResponse {
    pub fn success(output: Value) -> Self {
        Self {
            status: Status::Success,
            errors: Vec::new(),
            output,
            status_code: StatusCode::OK,
        }
    }

    pub fn failure(errors: Vec<String>, status_code: StatusCode) -> Self {
        Self {
            status: Status::Failure,
            errors,
            output: Value::Null,
            status_code,
        }
    }

    /// Failure carrying handler or binding errors; 500 only when one of them is internal
    pub fn from_errors(errors: &[ApiError]) -> Self {
        let internal = worst(errors).map(|k| k.is_internal()).unwrap_or(false);
        let status_code = if internal {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        };
        Self::failure(errors.iter().map(|e| e.to_string()).collect(), status_code)
    }

    pub fn unauthorized() -> Self {
        Self::failure(vec!["client not authorized".to_string()], StatusCode::UNAUTHORIZED)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::failure(vec![message.into()], StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let status = self.status_code;
        match serde_json::to_value(&self) {
            Ok(body) => (status, Json(body)).into_response(),
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "status": "failure",
                        "errors": ["failed to serialize response data"],
                        "output": null
                    })),
                )
                    .into_response()
            }
        }
    }
}
