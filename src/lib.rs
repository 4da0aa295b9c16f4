// Runtime configuration
pub mod config;

// Per-tenant credential records and encrypted storage
pub mod credentials;

// Error taxonomy for upstream calls
pub mod error;

// Marketplace OAuth token endpoint
pub mod oauth;

// Token lifecycle manager (inject, refresh on 401, retry once)
pub mod manager;

// Custom-value operations on top of the manager
pub mod custom_values;

// HTTP API
pub mod api;

pub use error::TokenError;
pub use manager::{RequestBody, TokenManager, Upstream, UpstreamResponse};
