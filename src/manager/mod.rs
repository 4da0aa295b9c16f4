//! Tenant-scoped access to the upstream resource API.
//!
//! A [`TokenManager`] is bound to one tenant for its lifetime. Each
//! [`TokenManager::call`] runs this state machine to completion:
//!
//! ```text
//!   First attempt ──2xx / non-401──► Done
//!        │ 401
//!        ▼
//!   Refreshing ──failure──► Failed (AuthenticationFailed)
//!        │ new token persisted
//!        ▼
//!   Retry ──2xx / non-401──► Done
//!        │ 401
//!        ▼
//!   Failed (AuthenticationFailed), no third attempt
//! ```
//!
//! Refreshes for one tenant are serialized through [`RefreshLocks`]. A call
//! that waited on the lock re-reads the store first and reuses a token that
//! a concurrent call already refreshed.

use crate::credentials::{CredentialRecord, CredentialStore};
use crate::error::TokenError;
use crate::oauth::{OAuthClient, TokenResponse};
use dashmap::DashMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Body of an outbound upstream request.
#[derive(Clone, Debug)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// Successful upstream response.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    /// Parsed JSON; `Null` for an empty body, a string for non-JSON text
    pub body: Value,
}

/// One mutex per tenant, shared by every manager built from the same
/// [`Upstream`].
#[derive(Clone, Default)]
pub struct RefreshLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl RefreshLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn for_tenant(&self, tenant_key: &str) -> Arc<Mutex<()>> {
        self.inner
            .entry(tenant_key.to_string())
            .or_default()
            .value()
            .clone()
    }
}

/// Everything a [`TokenManager`] needs, shared across tenants.
#[derive(Clone)]
pub struct Upstream {
    store: Arc<CredentialStore>,
    oauth: OAuthClient,
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    locks: RefreshLocks,
}

impl Upstream {
    pub fn new(
        store: Arc<CredentialStore>,
        oauth: OAuthClient,
        http: reqwest::Client,
        base_url: &str,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            oauth,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            locks: RefreshLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    /// Manager scoped to the tenant identified by a company or location id.
    pub fn manager(&self, tenant_key: impl Into<String>) -> TokenManager {
        TokenManager {
            tenant: tenant_key.into(),
            upstream: self.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// Makes upstream calls for one tenant, keeping its access token fresh.
#[derive(Clone)]
pub struct TokenManager {
    tenant: String,
    upstream: Upstream,
}

impl TokenManager {
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Sends `method path` with the tenant's bearer token.
    ///
    /// A 401 on the first attempt triggers one refresh and one retry with
    /// the new token. A 401 on the retry ends in
    /// [`TokenError::AuthenticationFailed`]. Other failures are returned
    /// unchanged and never retried.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<UpstreamResponse, TokenError> {
        let mut token = self.load_record()?.access_token;
        let mut attempt = Attempt::First;

        loop {
            match self.send(&method, path, &body, &token).await {
                Err(TokenError::UpstreamUnauthorized { .. }) if attempt == Attempt::First => {
                    warn!(
                        tenant = %self.tenant,
                        method = %method,
                        path,
                        "Access token rejected, refreshing"
                    );
                    token = self.refresh_after_rejection(&token).await?;
                    attempt = Attempt::Retry;
                }
                Err(TokenError::UpstreamUnauthorized { body, .. }) => {
                    warn!(
                        tenant = %self.tenant,
                        method = %method,
                        path,
                        "Refreshed access token rejected"
                    );
                    return Err(TokenError::AuthenticationFailed {
                        tenant: self.tenant.clone(),
                        reason: format!(
                            "{} {} still unauthorized after refresh: {}",
                            method, path, body
                        ),
                    });
                }
                other => return other,
            }
        }
    }

    /// Refreshes the tenant's token pair and returns the new access token.
    ///
    /// Fails with [`TokenError::TenantNotFound`] before any HTTP call when
    /// the tenant has no record. Nothing is written unless the token
    /// endpoint succeeds.
    pub async fn refresh(&self) -> Result<String, TokenError> {
        let lock = self.upstream.locks.for_tenant(&self.tenant);
        let _guard = lock.lock().await;

        let record = self.load_record()?;
        self.refresh_record(&record).await
    }

    /// Mints a location-scoped token from this company tenant's credentials.
    pub async fn mint_location_token(
        &self,
        company_id: &str,
        location_id: &str,
    ) -> Result<TokenResponse, TokenError> {
        let form = vec![
            ("companyId".to_string(), company_id.to_string()),
            ("locationId".to_string(), location_id.to_string()),
        ];
        let response = self
            .call(Method::POST, "/oauth/locationToken", RequestBody::Form(form))
            .await?;

        Ok(serde_json::from_value(response.body)?)
    }

    fn load_record(&self) -> Result<CredentialRecord, TokenError> {
        self.upstream
            .store
            .find(&self.tenant)?
            .ok_or_else(|| TokenError::TenantNotFound(self.tenant.clone()))
    }

    /// Refresh triggered by a 401 on `rejected_token`.
    async fn refresh_after_rejection(&self, rejected_token: &str) -> Result<String, TokenError> {
        let lock = self.upstream.locks.for_tenant(&self.tenant);
        let _guard = lock.lock().await;

        let record = self.load_record()?;
        if record.access_token != rejected_token {
            debug!(tenant = %self.tenant, "Token already refreshed by a concurrent call");
            return Ok(record.access_token);
        }

        self.refresh_record(&record).await.map_err(|e| match e {
            TokenError::TenantNotFound(_) | TokenError::Store(_) => e,
            other => TokenError::AuthenticationFailed {
                tenant: self.tenant.clone(),
                reason: format!("token refresh failed: {}", other),
            },
        })
    }

    /// Caller must hold the tenant's refresh lock.
    async fn refresh_record(&self, record: &CredentialRecord) -> Result<String, TokenError> {
        let user_type = record.refresh_user_type();
        info!(tenant = %self.tenant, user_type = %user_type, "Refreshing access token");

        let tokens = self
            .upstream
            .oauth
            .refresh(&record.refresh_token, user_type)
            .await?;

        let updated = self.upstream.store.update_tokens(
            &self.tenant,
            &tokens.access_token,
            &tokens.refresh_token,
            tokens.expires_in,
        )?;
        if !updated {
            return Err(TokenError::TenantNotFound(self.tenant.clone()));
        }

        info!(
            tenant = %self.tenant,
            expires_in = tokens.expires_in,
            "Access token refreshed"
        );
        Ok(tokens.access_token)
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: &RequestBody,
        token: &str,
    ) -> Result<UpstreamResponse, TokenError> {
        let url = format!("{}{}", self.upstream.base_url, path);
        let request = self
            .upstream
            .http
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header("Version", &self.upstream.api_version)
            .header("Accept", "application/json");
        let request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(json) => request.json(json),
            RequestBody::Form(form) => request.form(form),
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(tenant = %self.tenant, method = %method, path, status = %status, "Upstream responded");

        if status == StatusCode::UNAUTHORIZED {
            return Err(TokenError::UpstreamUnauthorized {
                method: method.clone(),
                path: path.to_string(),
                body: text,
            });
        }
        if !status.is_success() {
            return Err(TokenError::Upstream {
                method: method.clone(),
                path: path.to_string(),
                status,
                body: text,
            });
        }

        Ok(UpstreamResponse {
            status,
            body: parse_body(text),
        })
    }
}

fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
