// src/services/envelope.rs
//! Response envelopes shared by every endpoint.
//!
//! Success: `{"success": true, "data": ...}`.
//! Failure: `{"success": false, "error": {message, status, code, validation?}}`
//! where `code` is one of `VALIDATION_ERROR`, `SERVER_ERROR`, `TIMEOUT` or
//! `VERIFICATION_ERROR`, so callers can tell "fix your input" from "retry
//! later" from "something broke".

use crate::models::condition::ValidationError;
use crate::services::identity_resolver::ResolveError;
use crate::services::verifier::VerifyError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Successful response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Success<T> {
    pub success: bool,
    pub data: T,
}

/// Wraps `data` in the success envelope.
pub fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success { success: true, data })
}

/// Failed response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub status: u16,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<BTreeMap<String, Vec<String>>>,
}

/// HTTP-facing error; each variant fixes a status and a stable code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(BTreeMap<String, Vec<String>>),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Verification(String),

    #[error("{0}")]
    Server(String),
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            // The envelope has no dedicated not-found code.
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "SERVER_ERROR"),
            ApiError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            ApiError::Verification(_) => (StatusCode::INTERNAL_SERVER_ERROR, "VERIFICATION_ERROR"),
            ApiError::Server(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR"),
        }
    }

    /// Maps a single-read ledger lookup failure, prefixing messages with
    /// what was being fetched (e.g. "user data").
    pub fn from_lookup(err: ResolveError, what: &str) -> Self {
        match err {
            ResolveError::SubjectNotFound(_) => ApiError::NotFound("User not found".into()),
            ResolveError::LedgerTimeout(_) => ApiError::Timeout(format!("Failed to fetch {}: Request timeout", what)),
            ResolveError::Ledger(e) => ApiError::Server(format!("Failed to fetch {}: {}", what, e)),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.field_errors())
    }
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        match &err {
            VerifyError::Validation(e) => e.clone().into(),
            VerifyError::SubjectNotFound(_) => ApiError::NotFound(err.to_string()),
            VerifyError::LedgerTimeout(_) => ApiError::Timeout(format!("Verification failed: {}", err)),
            VerifyError::Verification(_) => ApiError::Verification(err.to_string()),
            VerifyError::History(_) => ApiError::Server(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() && status != StatusCode::GATEWAY_TIMEOUT {
            log::error!("{}", self);
        } else if status == StatusCode::GATEWAY_TIMEOUT {
            log::warn!("{}", self);
        } else {
            log::debug!("Rejected request: {}", self);
        }

        let message = self.to_string();
        let validation = match self {
            ApiError::Validation(fields) => Some(fields),
            _ => None,
        };
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                message,
                status: status.as_u16(),
                code: code.to_string(),
                validation,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::condition::AttributeKind;
    use crate::services::identity_resolver::tests::account;
    use crate::services::identity_resolver::LedgerError;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::Validation(BTreeMap::new()), 400, "VALIDATION_ERROR"),
            (ApiError::NotFound("x".into()), 404, "SERVER_ERROR"),
            (ApiError::Timeout("x".into()), 504, "TIMEOUT"),
            (ApiError::Verification("x".into()), 500, "VERIFICATION_ERROR"),
            (ApiError::Server("x".into()), 500, "SERVER_ERROR"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (StatusCode::from_u16(status).unwrap(), code));
        }
    }

    #[test]
    fn test_verify_errors_map_to_envelope_codes() {
        let invalid = ValidationError::InvalidCondition {
            kind: AttributeKind::Age,
            reason: "value must be a number".into(),
        };
        match ApiError::from(VerifyError::Validation(invalid)) {
            ApiError::Validation(fields) => {
                assert_eq!(fields["conditions.age"], vec!["Invalid age condition: value must be a number"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let timeout = ApiError::from(VerifyError::LedgerTimeout(Duration::from_secs(5)));
        assert_eq!(timeout.status_and_code().1, "TIMEOUT");

        let broken = ApiError::from(VerifyError::Verification("rpc down".into()));
        assert_eq!(broken.to_string(), "Verification failed: rpc down");
        assert!(matches!(ApiError::from(VerifyError::SubjectNotFound(account('1'))), ApiError::NotFound(_)));
    }

    #[test]
    fn test_lookup_errors_name_the_resource() {
        let err = ApiError::from_lookup(ResolveError::Ledger(LedgerError::Unavailable("503".into())), "user data");
        assert_eq!(err.to_string(), "Failed to fetch user data: ledger unavailable: 503");
        let err = ApiError::from_lookup(ResolveError::LedgerTimeout(Duration::from_secs(5)), "certificate data");
        assert_eq!(err.status_and_code().0, StatusCode::GATEWAY_TIMEOUT);
    }
}
