//! Custom-value proxy endpoints.
//!
//! The location id in each route doubles as the tenant key, so every call
//! runs with that location's credentials.

use super::{AppError, AppState};
use crate::custom_values::CustomValuesClient;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "locationId")]
    location_id: Option<String>,
}

/// Request body for create, update and manage
#[derive(Deserialize)]
pub struct CustomValueInput {
    #[serde(default)]
    name: Option<String>,
    /// Any JSON scalar; numbers and booleans are sent upstream as text
    #[serde(default)]
    value: Option<Value>,
}

impl CustomValueInput {
    fn require(self) -> Result<(String, String), AppError> {
        let value = match self.value {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        };
        match (self.name, value) {
            (Some(name), Some(value)) if !name.is_empty() && !value.is_empty() => {
                Ok((name, value))
            }
            _ => Err(AppError::BadRequest(
                "Name and value are required.".to_string(),
            )),
        }
    }
}

pub fn create_custom_values_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/custom-values", get(list_custom_values))
        .route("/api/v1/custom-values/:location_id", post(create_custom_value))
        .route(
            "/api/v1/custom-values/:location_id/customValues/:id",
            put(update_custom_value),
        )
        .route(
            "/api/v1/custom-values/manage/:location_id",
            post(manage_custom_value),
        )
        .with_state(state)
}

fn client_for(state: &AppState, location_id: &str) -> CustomValuesClient {
    CustomValuesClient::new(state.upstream.manager(location_id))
}

/// GET /api/v1/custom-values?locationId=...
async fn list_custom_values(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let location_id = query
        .location_id
        .filter(|l| !l.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'locationId' parameter".to_string()))?;

    debug!(tenant = %location_id, "Listing custom values");
    let body = client_for(&state, &location_id).list(&location_id).await?;
    Ok(Json(body))
}

/// POST /api/v1/custom-values/:location_id
async fn create_custom_value(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<String>,
    input: Result<Json<CustomValueInput>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(input) = input?;
    let (name, value) = input.require()?;

    debug!(tenant = %location_id, name = %name, "Creating custom value");
    let body = client_for(&state, &location_id)
        .create(&location_id, &name, &value)
        .await?;
    Ok(Json(body))
}

/// PUT /api/v1/custom-values/:location_id/customValues/:id
async fn update_custom_value(
    State(state): State<Arc<AppState>>,
    Path((location_id, id)): Path<(String, String)>,
    input: Result<Json<CustomValueInput>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(input) = input?;
    let (name, value) = input.require()?;

    debug!(tenant = %location_id, id = %id, "Updating custom value");
    let body = client_for(&state, &location_id)
        .update(&location_id, &id, &name, &value)
        .await?;
    Ok(Json(body))
}

/// POST /api/v1/custom-values/manage/:location_id
async fn manage_custom_value(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<String>,
    input: Result<Json<CustomValueInput>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(input) = input?;
    let (name, value) = input.require()?;

    debug!(tenant = %location_id, name = %name, "Managing custom value");
    let body = client_for(&state, &location_id)
        .manage(&location_id, &name, &value)
        .await?;
    Ok(Json(body))
}
