use crate::oauth::build_install_url;
use anyhow::{bail, Context, Result};
use axum::http::HeaderValue;
use serde::Deserialize;
use std::path::Path;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Single origin allowed by CORS; CORS is off when unset
    #[serde(default)]
    pub allowed_origin: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origin: None,
        }
    }
}

/// Marketplace endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the resource API and the `/oauth/token` endpoint
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Value of the `Version` header sent on resource API calls
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Marketplace page the install route redirects to
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
}

fn default_api_base_url() -> String {
    "https://services.leadconnectorhq.com".to_string()
}

fn default_api_version() -> String {
    "2021-07-28".to_string()
}

fn default_authorize_url() -> String {
    "https://marketplace.gohighlevel.com/oauth/chooselocation".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            authorize_url: default_authorize_url(),
        }
    }
}

/// Marketplace app credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    /// Space-delimited scopes requested at install
    #[serde(default)]
    pub scope: String,
}

/// Credential database
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Base64-encoded 32-byte key for tokens at rest
    #[serde(default)]
    pub encryption_key: String,
}

fn default_db_path() -> String {
    "credentials.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            encryption_key: String::new(),
        }
    }
}

impl AppConfig {
    /// Loads the TOML file at `path` when it exists, then applies
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            AppConfig::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Overrides fields from variables resolved by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets: [(&str, &mut String); 8] = [
            ("GHL_APP_CLIENT_ID", &mut self.oauth.client_id),
            ("GHL_APP_CLIENT_SECRET", &mut self.oauth.client_secret),
            ("GHL_APP_SCOPE", &mut self.oauth.scope),
            ("REDIRECT_URI", &mut self.oauth.redirect_uri),
            ("GHL_API_DOMAIN", &mut self.upstream.api_base_url),
            ("GHL_BRIDGE_ENCRYPTION_KEY", &mut self.storage.encryption_key),
            ("GHL_BRIDGE_DB_PATH", &mut self.storage.db_path),
            ("GHL_BRIDGE_BIND", &mut self.server.bind),
        ];
        for (name, field) in targets {
            if let Some(value) = lookup(name) {
                *field = value;
            }
        }

        if let Some(origin) = lookup("GHL_BRIDGE_ALLOWED_ORIGIN") {
            self.server.allowed_origin = Some(origin);
        }
    }

    /// Fails when a value required to talk to the marketplace is missing.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("oauth.client_id (GHL_APP_CLIENT_ID)", &self.oauth.client_id),
            ("oauth.client_secret (GHL_APP_CLIENT_SECRET)", &self.oauth.client_secret),
            ("oauth.redirect_uri (REDIRECT_URI)", &self.oauth.redirect_uri),
            (
                "storage.encryption_key (GHL_BRIDGE_ENCRYPTION_KEY)",
                &self.storage.encryption_key,
            ),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            bail!("Missing required configuration: {}", missing.join(", "));
        }

        // The install route sends this URL as a Location header
        HeaderValue::from_str(&self.install_url())
            .context("upstream.authorize_url does not form a valid redirect URL")?;
        Ok(())
    }

    /// Marketplace URL the install route redirects to.
    pub fn install_url(&self) -> String {
        build_install_url(
            &self.upstream.authorize_url,
            &self.oauth.client_id,
            &self.oauth.redirect_uri,
            &self.oauth.scope,
        )
    }
}
