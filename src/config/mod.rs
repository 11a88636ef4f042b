//! Configuration and credential storage
//!
//! Backed by an INI-style `config.txt`: the `microsoft` section carries the
//! app registration, `tokens` receives what a login produces.

pub mod ini;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub use ini::{Ini, Section};

use crate::auth::{StoredToken, TokenStore};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.txt";

pub const MICROSOFT_SECTION: &str = "microsoft";
pub const TOKENS_SECTION: &str = "tokens";
pub const PROXY_SECTION: &str = "proxy";

/// Application configuration bound to the file it came from.
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    ini: Ini,
}

impl Config {
    /// Load configuration from disk. A missing file yields an empty config.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            tracing::debug!("{} not found, starting from empty config", path.display());
            return Ok(Self {
                path,
                ini: Ini::new(),
            });
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let ini = Ini::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(Self { path, ini })
    }

    /// Rewrite the whole configuration file.
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        fs::write(&self.path, self.ini.to_string())
            .with_context(|| format!("Failed to write config file {}", self.path.display()))?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms).context("Failed to set config permissions")?;
        }

        tracing::debug!("Wrote {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini.get(section, key)
    }

    /// Like [`Config::get`], but treats blank values as absent.
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).filter(|v| !v.trim().is_empty())
    }

    /// Fetch a key that must be present and non-empty.
    pub fn require(&self, section: &str, key: &str) -> Result<&str> {
        if !self.ini.has_section(section) {
            anyhow::bail!(
                "Missing [{}] section in {}",
                section,
                self.path.display()
            );
        }
        self.get_non_empty(section, key).with_context(|| {
            format!(
                "Missing '{}' in [{}] section of {}",
                key,
                section,
                self.path.display()
            )
        })
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.ini.set(section, key, value);
    }

    pub fn remove(&mut self, section: &str, key: &str) -> Option<String> {
        self.ini.section_mut(section).remove(key)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.ini.section(name)
    }
}

impl TokenStore for Config {
    fn get_access_token(&self) -> Option<StoredToken> {
        let token = self.get_non_empty(TOKENS_SECTION, "access_token")?;
        Some(StoredToken {
            token: token.to_string(),
            expires_at: self
                .get_non_empty(TOKENS_SECTION, "expires_at")
                .map(String::from),
        })
    }

    fn set_access_token(&mut self, token: String, expires_at: Option<String>) {
        self.set(TOKENS_SECTION, "access_token", token);
        match expires_at {
            Some(at) => self.set(TOKENS_SECTION, "expires_at", at),
            None => {
                self.remove(TOKENS_SECTION, "expires_at");
            }
        }
    }

    fn get_refresh_token(&self) -> Option<String> {
        self.get_non_empty(TOKENS_SECTION, "refresh_token")
            .map(String::from)
    }

    fn set_refresh_token(&mut self, token: String) {
        self.set(TOKENS_SECTION, "refresh_token", token);
    }
}
