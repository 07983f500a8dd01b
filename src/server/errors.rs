use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::error::SignError;

/// Errors surfaced by the HTTP layer, mapped to status codes and the JSON
/// error envelope the service has always returned.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request envelope itself is unusable (bad base64, bad PKCS#12,
    /// wrong passphrase, missing key material).
    #[error("{0}")]
    BadRequest(String),

    /// The signing pipeline rejected the inputs or failed.
    #[error(transparent)]
    Sign(#[from] SignError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Sign(e) => match e {
                SignError::MalformedXml(_)
                | SignError::ElementNotFound(_)
                | SignError::KeyMismatch
                | SignError::UnsupportedAlgorithm(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SignError::DigestComputation(_) | SignError::Signing(_) => {
                    tracing::error!(error = %e, "signing pipeline failure");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        };
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_are_client_status_codes() {
        let response =
            ApiError::Sign(SignError::MalformedXml("oops".into())).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = ApiError::BadRequest("bad base64".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn pipeline_failures_are_internal_errors() {
        let response = ApiError::Sign(SignError::Signing("provider".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
