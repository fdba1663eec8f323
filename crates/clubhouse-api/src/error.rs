//! API error handling
//!
//! Credential failures are rendered by the auth crate so that handler and
//! middleware rejections share one body shape and one 401 message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clubhouse_auth::middleware::auth_error_response;
use clubhouse_auth::{AuthError, ErrorResponse};
use thiserror::Error;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Principal lacks the scope an endpoint requires
    #[error("Missing permission: {0}")]
    Forbidden(&'static str),

    /// No identity provider is configured on this deployment
    #[error("OIDC login is not configured")]
    OidcNotConfigured,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(e) => StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::OidcNotConfigured => StatusCode::NOT_FOUND,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.error_code(),
            Self::Forbidden(_) => "FORBIDDEN",
            Self::OidcNotConfigured => "OIDC_NOT_CONFIGURED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Auth(e) => {
                if e.is_server_error() {
                    tracing::error!(error = %e, "Request failed");
                }
                auth_error_response(e)
            }
            other => {
                let body = ErrorResponse {
                    code: other.error_code().to_string(),
                    message: other.to_string(),
                    limit: None,
                };
                (other.status_code(), Json(body)).into_response()
            }
        }
    }
}

impl From<clubhouse_db::DbError> for ApiError {
    fn from(err: clubhouse_db::DbError) -> Self {
        Self::Auth(AuthError::from(err))
    }
}
