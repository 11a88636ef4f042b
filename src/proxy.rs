//! Outbound proxy resolution
//!
//! The proxy is resolved once per run through a [`ProxyResolver`]. Resolution
//! never fails the run: an unreadable setting means a direct connection.

use anyhow::{bail, Context, Result};

use crate::config::{Config, PROXY_SECTION};

/// Proxy URLs for plain and TLS traffic. `None` means connect directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl ProxySettings {
    pub fn direct() -> Self {
        Self::default()
    }

    /// Route both schemes through `host:port`.
    pub fn server(server: &str) -> Self {
        let url = format!("http://{}", server);
        Self {
            http: Some(url.clone()),
            https: Some(url),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }

    /// Configure a reqwest client builder with these settings.
    pub fn apply(&self, builder: reqwest::ClientBuilder) -> Result<reqwest::ClientBuilder> {
        if self.is_direct() {
            return Ok(builder.no_proxy());
        }

        let mut builder = builder;
        if let Some(ref url) = self.http {
            let proxy = reqwest::Proxy::http(url)
                .with_context(|| format!("Invalid HTTP proxy URL {}", url))?;
            builder = builder.proxy(proxy);
        }
        if let Some(ref url) = self.https {
            let proxy = reqwest::Proxy::https(url)
                .with_context(|| format!("Invalid HTTPS proxy URL {}", url))?;
            builder = builder.proxy(proxy);
        }
        Ok(builder)
    }
}

/// Strategy for discovering the proxy to use.
pub trait ProxyResolver {
    fn resolve(&self) -> Result<ProxySettings>;
}

/// Reads `enabled` and `server` from the `[proxy]` section.
pub struct ConfigProxyResolver<'a> {
    config: &'a Config,
}

impl<'a> ConfigProxyResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }
}

impl ProxyResolver for ConfigProxyResolver<'_> {
    fn resolve(&self) -> Result<ProxySettings> {
        let Some(section) = self.config.section(PROXY_SECTION) else {
            return Ok(ProxySettings::direct());
        };

        let enabled = match section.get("enabled") {
            Some(v) => parse_flag(v)?,
            None => false,
        };
        let server = section.get("server").unwrap_or_default().trim();

        if enabled && is_host_port(server) {
            Ok(ProxySettings::server(server))
        } else {
            Ok(ProxySettings::direct())
        }
    }
}

/// Reads the conventional `HTTP_PROXY` / `HTTPS_PROXY` variables.
pub struct EnvProxyResolver;

impl EnvProxyResolver {
    fn var(name: &str) -> Option<String> {
        std::env::var(name)
            .or_else(|_| std::env::var(name.to_lowercase()))
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

impl ProxyResolver for EnvProxyResolver {
    fn resolve(&self) -> Result<ProxySettings> {
        Ok(ProxySettings {
            http: Self::var("HTTP_PROXY"),
            https: Self::var("HTTPS_PROXY"),
        })
    }
}

/// Tries each resolver in order; the first non-direct answer wins.
pub struct ChainResolver<'a> {
    resolvers: Vec<Box<dyn ProxyResolver + 'a>>,
}

impl<'a> ChainResolver<'a> {
    pub fn new(resolvers: Vec<Box<dyn ProxyResolver + 'a>>) -> Self {
        Self { resolvers }
    }
}

impl ProxyResolver for ChainResolver<'_> {
    fn resolve(&self) -> Result<ProxySettings> {
        for resolver in &self.resolvers {
            let settings = resolver.resolve()?;
            if !settings.is_direct() {
                return Ok(settings);
            }
        }
        Ok(ProxySettings::direct())
    }
}

/// Resolve the proxy, falling back to a direct connection on any error.
pub fn detect(resolver: &dyn ProxyResolver) -> ProxySettings {
    match resolver.resolve() {
        Ok(settings) => {
            if let Some(url) = settings.https.as_ref().or(settings.http.as_ref()) {
                tracing::info!("Using proxy {}", url);
            }
            settings
        }
        Err(e) => {
            tracing::debug!("Proxy settings unreadable, connecting directly: {:#}", e);
            ProxySettings::direct()
        }
    }
}

/// Build the HTTP client used for all outbound calls.
pub fn http_client(settings: &ProxySettings) -> Result<reqwest::Client> {
    settings
        .apply(reqwest::Client::builder())?
        .build()
        .context("Failed to create HTTP client")
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" | "" => Ok(false),
        other => bail!("Not a boolean: {:?}", other),
    }
}

fn is_host_port(server: &str) -> bool {
    let parts: Vec<&str> = server.split(':').collect();
    parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty()
}
