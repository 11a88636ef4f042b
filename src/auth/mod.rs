//! Authentication module for Microsoft identity
//!
//! Implements the OAuth2 authorization code flow: the user signs in through
//! the browser, the code arriving at the local redirect URI is exchanged for
//! an access/refresh token pair, and the pair is stored in the config file.

pub mod authorize;
pub mod browser;
pub mod error;
pub mod oauth;
pub mod token;
pub mod tokens;

use anyhow::{Context, Result};
use url::Url;

use crate::config::{Config, MICROSOFT_SECTION};

pub use error::AuthError;
pub use oauth::{login, refresh, status, LoginOptions};
pub use tokens::{StoredToken, TokenStore};

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_TENANT: &str = "common";

/// Scopes requested when the config does not list its own.
pub const DEFAULT_SCOPES: &[&str] = &[
    "offline_access",
    "https://graph.microsoft.com/Mail.ReadWrite",
    "https://graph.microsoft.com/Mail.Send",
    "https://graph.microsoft.com/User.Read",
];

/// App registration details read from the `[microsoft]` section.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret (confidential client)
    pub client_secret: String,
    /// Registered redirect URI, e.g. `http://localhost:8000/callback`
    pub redirect_uri: String,
    /// Identity provider base URL
    pub authority: String,
    /// Azure AD tenant (common for multi-tenant)
    pub tenant: String,
    pub scopes: Vec<String>,
}

impl AuthConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client_id = config.require(MICROSOFT_SECTION, "client_id")?.to_string();
        let client_secret = config
            .require(MICROSOFT_SECTION, "client_secret")?
            .to_string();
        let redirect_uri = config.require(MICROSOFT_SECTION, "redirect_uri")?.to_string();
        Url::parse(&redirect_uri)
            .with_context(|| format!("Invalid redirect_uri {:?}", redirect_uri))?;

        let authority = config
            .get_non_empty(MICROSOFT_SECTION, "authority")
            .unwrap_or(DEFAULT_AUTHORITY)
            .trim_end_matches('/')
            .to_string();
        let tenant = config
            .get_non_empty(MICROSOFT_SECTION, "tenant")
            .unwrap_or(DEFAULT_TENANT)
            .to_string();
        let scopes = match config.get_non_empty(MICROSOFT_SECTION, "scopes") {
            Some(list) => list.split_whitespace().map(String::from).collect(),
            None => DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            authority,
            tenant,
            scopes,
        })
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/authorize", self.authority, self.tenant)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant)
    }

    /// Space-separated scope parameter.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}
