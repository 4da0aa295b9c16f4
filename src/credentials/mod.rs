//! Per-tenant OAuth credential records and their encrypted SQLite store.
//!
//! A tenant is either a company or a location in the upstream marketplace.
//! Each tenant owns at most one [`CredentialRecord`], found by whichever
//! identifier the caller holds:
//!
//! ```text
//!   find("loc_123") ──┐
//!                     ├──► WHERE company_id = ?1 OR location_id = ?1
//!   find("cmp_456") ──┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use ghl_bridge::credentials::{CredentialRecord, CredentialStore, UserType};
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = std::env::var("GHL_BRIDGE_ENCRYPTION_KEY")?;
//! let store = CredentialStore::new("credentials.db", &key)?;
//!
//! let record = CredentialRecord {
//!     location_id: Some("loc_123".to_string()),
//!     user_type: Some(UserType::Location),
//!     ..CredentialRecord::new("access", "refresh")
//! };
//! store.upsert("loc_123", &record)?;
//!
//! store.update_tokens("loc_123", "new-access", "new-refresh", 86399)?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

mod encryption;
mod storage;

pub use encryption::TokenCipher;
pub use storage::CredentialStore;

/// Which scope of upstream account owns a credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserType {
    Company,
    Location,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Company => "Company",
            UserType::Location => "Location",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Company" => Some(UserType::Company),
            "Location" => Some(UserType::Location),
            _ => None,
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth credentials for one tenant.
///
/// Tokens are plaintext in memory and encrypted only when written to the
/// store. `Debug` output redacts both tokens.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialRecord {
    /// Company-scope identifier
    pub company_id: Option<String>,

    /// Location-scope identifier
    pub location_id: Option<String>,

    /// Short-lived bearer token for resource API calls
    pub access_token: String,

    /// Long-lived token used only to mint a new access token
    pub refresh_token: String,

    pub token_type: String,

    /// Space-delimited scopes granted at authorization time
    pub scope: String,

    /// Seconds-to-live hint at issuance. Informational: expiry is detected
    /// from upstream 401s, never from this value.
    pub expires_in: i64,

    /// User type reported by the upstream at authorization time
    pub user_type: Option<UserType>,

    pub user_id: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Record with the given token pair and every other field empty.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            company_id: None,
            location_id: None,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: "Bearer".to_string(),
            scope: String::new(),
            expires_in: 0,
            user_type: None,
            user_id: None,
            updated_at: Utc::now(),
        }
    }

    /// Key a freshly authorized record is stored under: the location id
    /// when present, else the company id.
    pub fn tenant_key(&self) -> Option<&str> {
        non_empty(&self.location_id).or_else(|| non_empty(&self.company_id))
    }

    /// User type to send when refreshing this record's tokens.
    ///
    /// `Company` iff the record carries a non-empty company id.
    pub fn refresh_user_type(&self) -> UserType {
        if non_empty(&self.company_id).is_some() {
            UserType::Company
        } else {
            UserType::Location
        }
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("company_id", &self.company_id)
            .field("location_id", &self.location_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("user_type", &self.user_type)
            .field("user_id", &self.user_id)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
