//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the identity service endpoints, the consultant API base URL,
//! the session storage backend, and the last used email.
//!
//! Configuration is stored at `~/.config/consultdesk/config.json`. Values can
//! be overridden through `CONSULTDESK_*` environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::SessionBackend;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "consultdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_SIGN_IN_URL: &str =
    "https://identitytoolkit.googleapis.com/v1/accounts:signInWithPassword";
pub const DEFAULT_REFRESH_URL: &str = "https://securetoken.googleapis.com/v1/token";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/consultants";

pub const ENV_API_KEY: &str = "CONSULTDESK_API_KEY";
pub const ENV_SIGN_IN_URL: &str = "CONSULTDESK_SIGN_IN_URL";
pub const ENV_REFRESH_URL: &str = "CONSULTDESK_REFRESH_URL";
pub const ENV_API_URL: &str = "CONSULTDESK_API_URL";
pub const ENV_SESSION_BACKEND: &str = "CONSULTDESK_SESSION_BACKEND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key passed to the identity service on every exchange
    pub api_key: Option<String>,
    pub sign_in_url: String,
    pub refresh_url: String,
    pub api_base_url: String,
    pub session_backend: SessionBackend,
    pub last_identifier: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            sign_in_url: DEFAULT_SIGN_IN_URL.to_string(),
            refresh_url: DEFAULT_REFRESH_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            session_backend: SessionBackend::default(),
            last_identifier: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `CONSULTDESK_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_SIGN_IN_URL) {
            self.sign_in_url = url;
        }
        if let Some(url) = lookup(ENV_REFRESH_URL) {
            self.refresh_url = url;
        }
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(backend) = lookup(ENV_SESSION_BACKEND) {
            match backend.parse() {
                Ok(backend) => self.session_backend = backend,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_SESSION_BACKEND),
            }
        }
        self
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
