use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use ghl_bridge::api::{create_router, AppState};
use ghl_bridge::config::AppConfig;
use ghl_bridge::credentials::CredentialStore;
use ghl_bridge::manager::Upstream;
use ghl_bridge::oauth::OAuthClient;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ghl_bridge=info".into()),
        )
        .init();

    let config_path = std::env::var("GHL_BRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("ghl-bridge.toml"));
    let config = AppConfig::load(&config_path)?;
    config.validate()?;

    info!("ghl-bridge v{} starting", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        CredentialStore::new(&config.storage.db_path, &config.storage.encryption_key)
            .context("Failed to open credential store")?,
    );
    info!(path = %config.storage.db_path, "Credential store ready");

    let http = reqwest::Client::builder()
        .user_agent(concat!("ghl-bridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let oauth = OAuthClient::new(
        http.clone(),
        &config.upstream.api_base_url,
        config.oauth.client_id.clone(),
        config.oauth.client_secret.clone(),
        config.oauth.redirect_uri.clone(),
    );
    let upstream = Upstream::new(
        store,
        oauth,
        http,
        &config.upstream.api_base_url,
        config.upstream.api_version.clone(),
    );

    let install_url = config.install_url();

    let mut app = create_router(AppState {
        upstream,
        install_url,
    });

    if let Some(origin) = &config.server.allowed_origin {
        let origin = HeaderValue::from_str(origin).context("Invalid allowed_origin")?;
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE]),
        );
        info!("CORS enabled");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
