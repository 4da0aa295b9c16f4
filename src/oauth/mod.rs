//! Client for the marketplace OAuth token endpoint.
//!
//! Every call here is one shot: no retry and no refresh around it. The
//! refresh-and-retry cycle lives in [`crate::manager`].

use crate::credentials::{CredentialRecord, UserType};
use crate::error::TokenError;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

const TOKEN_PATH: &str = "/oauth/token";

/// Token endpoint response.
#[derive(Deserialize, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(rename = "userType", default)]
    pub user_type: Option<UserType>,
    #[serde(rename = "companyId", default)]
    pub company_id: Option<String>,
    #[serde(rename = "locationId", default)]
    pub location_id: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Converts the response into a record owned by a single scope.
    ///
    /// A `Location` token keeps only its location id and a `Company` token
    /// only its company id, so the record's refresh user type always
    /// matches the scope that was granted. Without a reported user type
    /// the location id wins when present.
    pub fn into_record(self) -> CredentialRecord {
        let owner = self.user_type.unwrap_or(match self.location_id {
            Some(ref id) if !id.is_empty() => UserType::Location,
            _ => UserType::Company,
        });
        let (company_id, location_id) = match owner {
            UserType::Company => (self.company_id, None),
            UserType::Location => (None, self.location_id),
        };

        CredentialRecord {
            company_id,
            location_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            scope: self.scope,
            expires_in: self.expires_in,
            user_type: Some(owner),
            user_id: self.user_id,
            updated_at: Utc::now(),
        }
    }
}

/// Marketplace app credentials bound to a token endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl OAuthClient {
    /// # Arguments
    /// * `http` - Shared HTTP client
    /// * `base_url` - Upstream base URL; the token endpoint is `{base_url}/oauth/token`
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}{}", base_url.trim_end_matches('/'), TOKEN_PATH),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Exchanges an authorization code from the install callback.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, TokenError> {
        debug!("Exchanging authorization code for tokens");
        self.request_tokens("authorization_code", ("code", code), UserType::Company)
            .await
    }

    /// Trades a refresh token for a new token pair.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        user_type: UserType,
    ) -> Result<TokenResponse, TokenError> {
        debug!(user_type = %user_type, "Requesting refresh-token grant");
        self.request_tokens("refresh_token", ("refresh_token", refresh_token), user_type)
            .await
    }

    async fn request_tokens(
        &self,
        grant_type: &str,
        grant: (&str, &str),
        user_type: UserType,
    ) -> Result<TokenResponse, TokenError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", grant_type),
            grant,
            ("user_type", user_type.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form[..])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(TokenError::Upstream {
                method: Method::POST,
                path: TOKEN_PATH.to_string(),
                status,
                body,
            });
        }

        let tokens: TokenResponse = serde_json::from_slice(&response.bytes().await?)?;
        debug!(
            grant_type,
            expires_in = tokens.expires_in,
            "Token endpoint returned a new token pair"
        );
        Ok(tokens)
    }
}

/// Builds the marketplace URL that starts an app install.
pub fn build_install_url(
    authorize_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
) -> String {
    format!(
        "{}?response_type=code&redirect_uri={}&client_id={}&scope={}",
        authorize_url,
        urlencoding::encode(redirect_uri),
        urlencoding::encode(client_id),
        urlencoding::encode(scope)
    )
}
