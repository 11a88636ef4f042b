//! OAuth2 authorization code flow, plus refresh and status commands

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use super::authorize::{request_authorization, Clock, SystemClock};
use super::browser::{CallbackTab, Tab};
use super::token::{exchange_code, refresh_tokens, TokenResponse};
use super::tokens::apply_tokens;
use super::{AuthConfig, TokenStore};
use crate::config::{Config, MICROSOFT_SECTION};
use crate::proxy::{self, ChainResolver, ConfigProxyResolver, EnvProxyResolver};

/// Knobs for the interactive login.
#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// Upper bound on the wait for the browser redirect.
    pub timeout: Duration,
    /// Launch the system browser; otherwise only print the URL.
    pub open_browser: bool,
}

/// Outbound client routed through the configured or environment proxy.
fn build_http(config: &Config) -> Result<reqwest::Client> {
    let resolver = ChainResolver::new(vec![
        Box::new(ConfigProxyResolver::new(config)),
        Box::new(EnvProxyResolver),
    ]);
    proxy::http_client(&proxy::detect(&resolver))
}

/// Store a token response and rewrite the config file.
fn persist(config: &mut Config, tokens: &TokenResponse, now: DateTime<Local>) -> Result<bool> {
    if !apply_tokens(config, tokens, now) {
        return Ok(false);
    }
    config.save()?;
    tracing::info!("Tokens saved to {}", config.path().display());
    Ok(true)
}

/// Exchange `code` and persist the result. The file is left untouched when
/// the exchange fails.
pub async fn complete_login(
    http: &reqwest::Client,
    auth: &AuthConfig,
    config: &mut Config,
    code: &str,
    now: DateTime<Local>,
) -> Result<bool> {
    let tokens = exchange_code(http, auth, code).await?;
    persist(config, &tokens, now)
}

/// Run the browser sign-in on `tab` and release it, whatever the outcome.
async fn authorize_and_close<T: Tab, C: Clock>(
    tab: &mut T,
    auth: &AuthConfig,
    timeout: Duration,
    clock: &C,
) -> Result<String> {
    let code = request_authorization(tab, auth, timeout, clock).await;
    tab.close();
    code
}

/// Perform the interactive login flow
pub async fn login(config_path: &Path, options: &LoginOptions) -> Result<()> {
    let mut config = Config::load(config_path)?;
    let auth = AuthConfig::from_config(&config)?;
    let http = build_http(&config)?;

    let mut tab = CallbackTab::bind(&auth.redirect_uri, options.open_browser).await?;
    let code = authorize_and_close(&mut tab, &auth, options.timeout, &SystemClock).await?;

    if complete_login(&http, &auth, &mut config, &code, Local::now()).await? {
        println!("Login successful. Refresh token stored in {}.", config_path.display());
    } else {
        println!("Login finished, but no refresh token was returned (is offline_access granted?).");
    }
    Ok(())
}

/// Trade the stored refresh token for a new token pair.
pub async fn refresh(config_path: &Path) -> Result<()> {
    let mut config = Config::load(config_path)?;
    let auth = AuthConfig::from_config(&config)?;
    let refresh_token = config
        .get_refresh_token()
        .context("No refresh token stored. Run 'ms-refresh-token login' first.")?;
    let http = build_http(&config)?;

    tracing::info!("Refreshing tokens...");
    let mut tokens = refresh_tokens(&http, &auth, &refresh_token).await?;

    // Microsoft may omit a new refresh token; the old one stays valid
    if tokens.refresh_token.is_none() {
        tokens.refresh_token = Some(refresh_token);
    }

    persist(&mut config, &tokens, Local::now())?;
    println!("Tokens refreshed.");
    Ok(())
}

/// Display current auth status
pub async fn status(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    print!("{}", render_status(&config, Local::now()));
    Ok(())
}

fn render_status(config: &Config, now: DateTime<Local>) -> String {
    let mut out = String::new();

    out.push_str(&format!("Config:       {}\n", config.path().display()));
    match AuthConfig::from_config(config) {
        Ok(auth) => out.push_str(&format!("Client ID:    {}\n", auth.client_id)),
        Err(e) => out.push_str(&format!("Client ID:    not configured ({:#})\n", e)),
    }

    match config.get_refresh_token() {
        Some(_) => out.push_str("Refresh tok:  present\n"),
        None => out.push_str("Refresh tok:  none\n"),
    }

    match config.get_access_token() {
        Some(token) if token.is_expired(now) => {
            out.push_str("Access token: expired\n");
        }
        Some(token) => {
            out.push_str("Access token: valid\n");
            if let Some(ref exp) = token.expires_at {
                out.push_str(&format!("  expires_at: {}\n", exp));
            }
        }
        None => out.push_str("Access token: none\n"),
    }

    if config.section(MICROSOFT_SECTION).is_none() || config.get_refresh_token().is_none() {
        out.push_str("\nRun 'ms-refresh-token login' to authenticate.\n");
    }

    out
}
