//! Custom values of a location, read and written through a [`TokenManager`].

use crate::error::TokenError;
use crate::manager::{RequestBody, TokenManager};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// One custom value as returned by the upstream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CustomValue {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "fieldKey", default, skip_serializing_if = "Option::is_none")]
    pub field_key: Option<String>,
}

#[derive(Deserialize)]
struct CustomValueList {
    #[serde(rename = "customValues", default)]
    custom_values: Vec<CustomValue>,
}

/// Custom-value operations for the manager's tenant.
///
/// Responses are passed through as the upstream's JSON.
pub struct CustomValuesClient {
    manager: TokenManager,
}

impl CustomValuesClient {
    pub fn new(manager: TokenManager) -> Self {
        Self { manager }
    }

    pub async fn list(&self, location_id: &str) -> Result<Value, TokenError> {
        let response = self
            .manager
            .call(Method::GET, &collection_path(location_id), RequestBody::Empty)
            .await?;
        Ok(response.body)
    }

    pub async fn create(
        &self,
        location_id: &str,
        name: &str,
        value: &str,
    ) -> Result<Value, TokenError> {
        let response = self
            .manager
            .call(
                Method::POST,
                &collection_path(location_id),
                RequestBody::Json(json!({ "name": name, "value": value })),
            )
            .await?;
        Ok(response.body)
    }

    pub async fn update(
        &self,
        location_id: &str,
        id: &str,
        name: &str,
        value: &str,
    ) -> Result<Value, TokenError> {
        let path = format!("{}/{}", collection_path(location_id), urlencoding::encode(id));
        let response = self
            .manager
            .call(
                Method::PUT,
                &path,
                RequestBody::Json(json!({ "name": name, "value": value })),
            )
            .await?;
        Ok(response.body)
    }

    /// Updates the custom value named `name`, or creates it when absent.
    pub async fn manage(
        &self,
        location_id: &str,
        name: &str,
        value: &str,
    ) -> Result<Value, TokenError> {
        let list: CustomValueList = serde_json::from_value(self.list(location_id).await?)?;

        match list.custom_values.iter().find(|cv| cv.name == name) {
            Some(existing) => {
                info!(location_id, id = %existing.id, "Updating existing custom value");
                self.update(location_id, &existing.id, name, value).await
            }
            None => {
                info!(location_id, "Creating custom value");
                self.create(location_id, name, value).await
            }
        }
    }
}

fn collection_path(location_id: &str) -> String {
    format!("/locations/{}/customValues", urlencoding::encode(location_id))
}
