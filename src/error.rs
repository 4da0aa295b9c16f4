//! Error types for upstream calls made on behalf of a tenant.

use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Failure of an upstream call or of the token lifecycle around it.
#[derive(Error, Debug)]
pub enum TokenError {
    /// No credential record matches the tenant key
    #[error("Tenant {0} not found")]
    TenantNotFound(String),

    /// The upstream rejected the bearer token (401)
    #[error("Upstream rejected the access token for {method} {path}")]
    UpstreamUnauthorized {
        method: Method,
        path: String,
        body: String,
    },

    /// Refresh failed, or the retried call was rejected again
    #[error("Authentication failed for tenant {tenant}: {reason}")]
    AuthenticationFailed { tenant: String, reason: String },

    /// Any other non-2xx response from the upstream
    #[error("Upstream returned {status} for {method} {path}: {body}")]
    Upstream {
        method: Method,
        path: String,
        status: StatusCode,
        body: String,
    },

    /// The request never produced a response
    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A 2xx body did not have the expected shape
    #[error("Unexpected upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Credential store failure
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl TokenError {
    /// Upstream status code, when the failure carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TokenError::UpstreamUnauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            TokenError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}
