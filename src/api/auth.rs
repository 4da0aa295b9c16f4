//! Marketplace install flow.
//!
//! 1. GET /api/v1/auth/install → redirect to the marketplace chooser
//! 2. Marketplace redirects back to /api/v1/auth/authorize?code=...
//! 3. Exchange the code once and upsert the tenant's credential record
//!
//! GET /api/v1/auth/authorize-location mints a location token from an
//! already installed company and stores it under the location id.

use super::{AppError, AppState};
use crate::credentials::UserType;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Install callback query parameters
#[derive(Deserialize)]
pub struct AuthorizeQuery {
    code: Option<String>,
}

/// Location authorization query parameters
#[derive(Deserialize)]
pub struct AuthorizeLocationQuery {
    #[serde(rename = "companyId")]
    company_id: Option<String>,
    #[serde(rename = "locationId")]
    location_id: Option<String>,
}

/// Authorization success response
#[derive(Serialize)]
pub struct AuthorizeResponse {
    success: bool,
    message: String,
    tenant: String,
}

pub fn create_auth_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/auth/install", get(install))
        .route("/api/v1/auth/authorize", get(authorize))
        .route("/api/v1/auth/authorize-location", get(authorize_location))
        .with_state(state)
}

/// GET /api/v1/auth/install
async fn install(State(state): State<Arc<AppState>>) -> Redirect {
    debug!("Redirecting to marketplace install page");
    Redirect::temporary(&state.install_url)
}

/// GET /api/v1/auth/authorize
///
/// The code exchange is a single call; a failure is reported, never retried.
async fn authorize(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, AppError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;

    let tokens = state.upstream.oauth().exchange_code(&code).await.map_err(|e| {
        error!(error = %e, "Authorization code exchange failed");
        AppError::from(e)
    })?;

    let record = tokens.into_record();
    let tenant = record.tenant_key().map(str::to_string).ok_or_else(|| {
        warn!("Token response carried neither locationId nor companyId");
        AppError::BadRequest("No locationId or companyId provided".to_string())
    })?;

    state
        .upstream
        .store()
        .upsert(&tenant, &record)
        .map_err(|e| {
            error!(tenant = %tenant, error = %e, "Failed to store credentials");
            AppError::ServerError("Failed to store credentials".to_string())
        })?;

    info!(tenant = %tenant, user_type = ?record.user_type, "Authorization saved");

    Ok(Json(AuthorizeResponse {
        success: true,
        message: "Authorization successful and data saved.".to_string(),
        tenant,
    })
    .into_response())
}

/// GET /api/v1/auth/authorize-location
async fn authorize_location(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthorizeLocationQuery>,
) -> Result<Response, AppError> {
    let (company_id, location_id) = match (query.company_id, query.location_id) {
        (Some(c), Some(l)) if !c.is_empty() && !l.is_empty() => (c, l),
        _ => {
            return Err(AppError::BadRequest(
                "companyId and locationId are required".to_string(),
            ))
        }
    };

    let tokens = state
        .upstream
        .manager(company_id.as_str())
        .mint_location_token(&company_id, &location_id)
        .await?;

    let mut record = tokens.into_record();
    record.company_id = None;
    record.location_id = Some(location_id.clone());
    record.user_type = Some(UserType::Location);

    state
        .upstream
        .store()
        .upsert(&location_id, &record)
        .map_err(|e| {
            error!(tenant = %location_id, error = %e, "Failed to store credentials");
            AppError::ServerError("Failed to store credentials".to_string())
        })?;

    info!(company_id = %company_id, tenant = %location_id, "Location authorization saved");

    Ok(Json(AuthorizeResponse {
        success: true,
        message: "Authorization successful and data saved.".to_string(),
        tenant: location_id,
    })
    .into_response())
}
