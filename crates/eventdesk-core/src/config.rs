//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: where
//! the portal API and identity backend live, timeouts, the proactive refresh
//! window, and which credential store to use.
//!
//! Configuration is stored at `~/.config/eventdesk/config.json`. Environment
//! variables override individual fields.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::client::REQUEST_TIMEOUT_SECS;
use crate::auth::manager::DEFAULT_REFRESH_WINDOW_SECS;
use crate::auth::{AuthSettings, StoreKind};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "eventdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_IDENTITY_BASE_URL: &str = "http://localhost:8080/api";

const ENV_API_URL: &str = "EVENTDESK_API_URL";
const ENV_IDENTITY_URL: &str = "EVENTDESK_IDENTITY_URL";
const ENV_CREDENTIAL_STORE: &str = "EVENTDESK_CREDENTIAL_STORE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub identity_base_url: String,
    pub request_timeout_secs: u64,
    pub refresh_window_secs: i64,
    pub credential_store: StoreKind,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            identity_base_url: DEFAULT_IDENTITY_BASE_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            refresh_window_secs: DEFAULT_REFRESH_WINDOW_SECS,
            credential_store: StoreKind::default(),
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
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

    /// Apply `EVENTDESK_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(url) = lookup(ENV_IDENTITY_URL) {
            self.identity_base_url = url;
        }
        if let Some(kind) = lookup(ENV_CREDENTIAL_STORE) {
            match StoreKind::parse(&kind) {
                Some(kind) => self.credential_store = kind,
                None => warn!(value = %kind, "Ignoring unknown {}", ENV_CREDENTIAL_STORE),
            }
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            refresh_window: chrono::Duration::try_seconds(self.refresh_window_secs.max(0))
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}
