use std::fmt;

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::{assets::AssetError, storage::StoreError};

/// Why the session gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    Invalid,
    Expired,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AuthFailure::Missing => "session token missing",
            AuthFailure::Invalid => "session token invalid",
            AuthFailure::Expired => "session token expired",
        };
        f.write_str(msg)
    }
}

/// JSON body of every error response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `forbidden`.
    pub error: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("password incorrect")]
    InvalidCredentials,

    #[error("{0}")]
    Unauthorized(AuthFailure),

    #[error("only the owner may modify this place")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    UploadRejected(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("failed to fetch link: {0}")]
    Upstream(String),

    #[error("storage failure: {0}")]
    Storage(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::InvalidCredentials => (StatusCode::UNPROCESSABLE_ENTITY, "password_incorrect"),
            AppError::Unauthorized(AuthFailure::Missing) => (StatusCode::UNAUTHORIZED, "missing_token"),
            AppError::Unauthorized(AuthFailure::Invalid) => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AppError::Unauthorized(AuthFailure::Expired) => (StatusCode::UNAUTHORIZED, "expired_token"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::UploadRejected(_) => (StatusCode::BAD_REQUEST, "upload_rejected"),
            AppError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            AppError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Server-side faults are logged in full and reported generically.
        let message = if status.is_server_error() {
            error!(error = %self, code, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(msg) => AppError::Validation(msg),
            other => AppError::Storage(other),
        }
    }
}

impl From<AssetError> for AppError {
    fn from(e: AssetError) -> Self {
        match e {
            AssetError::Rejected(_) | AssetError::TooLarge(_) => AppError::UploadRejected(e.to_string()),
            AssetError::Fetch(_) | AssetError::Status(_) => AppError::Upstream(e.to_string()),
            AssetError::Io(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(e.body_text())
        } else {
            AppError::UploadRejected(e.body_text())
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("password hashing: {e}"))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        AppError::Internal(format!("token signing: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_map_to_401_with_distinct_codes() {
        let cases = [
            (AuthFailure::Missing, "missing_token"),
            (AuthFailure::Invalid, "invalid_token"),
            (AuthFailure::Expired, "expired_token"),
        ];
        for (failure, expected) in cases {
            let (status, code) = AppError::Unauthorized(failure).status_and_code();
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(code, expected);
        }
    }

    #[test]
    fn store_validation_becomes_client_error() {
        let err: AppError = StoreError::Validation("email taken".into()).into();
        assert!(matches!(err, AppError::Validation(ref m) if m == "email taken"));
        assert_eq!(err.status_and_code().0, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn asset_errors_split_between_client_and_upstream() {
        let rejected: AppError = AssetError::Rejected("bad scheme".into()).into();
        assert_eq!(rejected.status_and_code().0, StatusCode::BAD_REQUEST);

        let upstream: AppError = AssetError::Status(404).into();
        assert_eq!(upstream.status_and_code().0, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn forbidden_and_not_found_have_stable_statuses() {
        assert_eq!(AppError::Forbidden.status_and_code().0, StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("user").status_and_code().0, StatusCode::NOT_FOUND);
        assert_eq!(AppError::NotFound("user").to_string(), "user not found");
    }

    #[test]
    fn oversized_upload_keeps_413() {
        let (status, code) = AppError::PayloadTooLarge("too big".into()).status_and_code();
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(code, "payload_too_large");
    }
}
