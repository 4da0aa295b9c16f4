use crate::error::TokenError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    message: String,
}

/// Application error types for API endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    /// Upstream 4xx other than 401, forwarded with its status
    Upstream(StatusCode, String),
    BadGateway(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Upstream(status, msg) => (status, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            status: "error",
            message,
        });

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::TenantNotFound(_) => AppError::NotFound(err.to_string()),
            TokenError::UpstreamUnauthorized { .. } | TokenError::AuthenticationFailed { .. } => {
                warn!(error = %err, "Upstream authentication failed");
                AppError::Unauthorized(err.to_string())
            }
            TokenError::Upstream { status, .. } if status.is_client_error() => {
                // reqwest and axum carry different `http` crate versions
                let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
                AppError::Upstream(status, err.to_string())
            }
            TokenError::Upstream { .. } | TokenError::Transport(_) | TokenError::Decode(_) => {
                warn!(error = %err, "Upstream request failed");
                AppError::BadGateway(err.to_string())
            }
            TokenError::Store(_) => {
                error!(error = %err, "Credential store failure");
                AppError::ServerError("Something went wrong".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_mapping() {
        let cases = [
            (TokenError::TenantNotFound("loc_1".to_string()), StatusCode::NOT_FOUND),
            (
                TokenError::AuthenticationFailed {
                    tenant: "loc_1".to_string(),
                    reason: "revoked".to_string(),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                TokenError::Upstream {
                    method: reqwest::Method::POST,
                    path: "/x".to_string(),
                    status: reqwest::StatusCode::UNPROCESSABLE_ENTITY,
                    body: String::new(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                TokenError::Upstream {
                    method: reqwest::Method::GET,
                    path: "/x".to_string(),
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: String::new(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                TokenError::Store(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
