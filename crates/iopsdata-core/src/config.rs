use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChatError, Result};
use crate::provider::Provider;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_CHAT_PATH: &str = "/api/chat";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

const ENV_API_URL: &str = "IOPSDATA_API_URL";
const ENV_CONNECTION_ID: &str = "IOPSDATA_CONNECTION_ID";
const ENV_PROVIDER: &str = "IOPSDATA_PROVIDER";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub api_url: Option<String>,
    pub chat_path: Option<String>,
    pub connection_id: Option<String>,
    pub provider: Option<String>,
    pub dialect: Option<String>,
    pub auto_execute: Option<bool>,
    pub extract_sql: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("reading {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| ChatError::Config(format!("parsing {}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ChatError::Config(format!("creating {}: {}", parent.display(), e)))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ChatError::Config(e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| ChatError::Config(format!("writing {}: {}", path.display(), e)))?;
        Ok(())
    }

    pub fn save_provider(provider: Provider) -> Result<()> {
        Self::save_provider_to(&Self::get_config_path()?, provider)
    }

    /// Update only the provider in the file at `path`.
    ///
    /// A missing file starts from defaults; a file that cannot be read or
    /// parsed is left untouched and its error returned.
    pub fn save_provider_to(path: &Path, provider: Provider) -> Result<()> {
        let mut config = Self::load_from(path)?;
        config.provider = Some(provider.as_str().to_string());
        config.save_to(path)
    }

    /// Overlay environment variables on top of file values
    pub fn with_env(mut self) -> Self {
        self.apply_env(|key| std::env::var(key).ok());
        self
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_API_URL) {
            self.api_url = Some(url);
        }
        if let Some(id) = non_empty(ENV_CONNECTION_ID) {
            self.connection_id = Some(id);
        }
        if let Some(provider) = non_empty(ENV_PROVIDER) {
            self.provider = Some(provider);
        }
    }

    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
    }

    pub fn chat_path(&self) -> &str {
        self.chat_path.as_deref().unwrap_or(DEFAULT_CHAT_PATH)
    }

    pub fn chat_url(&self) -> String {
        let path = self.chat_path();
        if path.starts_with('/') {
            format!("{}{}", self.api_url(), path)
        } else {
            format!("{}/{}", self.api_url(), path)
        }
    }

    /// Configured provider, if it names a known one
    pub fn provider(&self) -> Option<Provider> {
        self.provider.as_deref().and_then(Provider::from_str)
    }

    pub fn extract_sql(&self) -> bool {
        self.extract_sql.unwrap_or(true)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ChatError::Config("Could not determine config directory".to_string()))?;

        Ok(config_dir.join("iopsdata").join("config.json"))
    }
}
