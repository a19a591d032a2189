//! Layered application configuration.
//!
//! Values come from built-in defaults, then `~/.config/automania/config.toml`,
//! then `AUTOMANIA_*` environment variables.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Directory under the user config dir holding all client state.
pub const CONFIG_DIR: &str = "automania";
/// Default marketplace service.
pub const DEFAULT_API_URL: &str = "https://automania.herokuapp.com";
/// Listings requested per feed page.
pub const DEFAULT_PAGE_SIZE: u32 = 9;
/// Per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the marketplace REST service.
    pub api_url: String,
    /// Fixed page size for the listing feed.
    pub page_size: u32,
    /// Timeout applied to every HTTP request.
    pub request_timeout_secs: u64,
    /// File holding the persisted credential and identity snapshot.
    pub session_path: PathBuf,
    /// Directory receiving the log file.
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        let root = config_root();
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            session_path: root.join("session.json"),
            log_dir: root.join("logs"),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file location and environment.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    /// Load configuration using `path` as the file layer.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let defaults = Self::default();
        let settings = Config::builder()
            .set_default("api_url", defaults.api_url)?
            .set_default("page_size", i64::from(defaults.page_size))?
            .set_default("request_timeout_secs", defaults.request_timeout_secs as i64)?
            .set_default(
                "session_path",
                defaults.session_path.to_string_lossy().to_string(),
            )?
            .set_default("log_dir", defaults.log_dir.to_string_lossy().to_string())?
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(Environment::with_prefix("AUTOMANIA"))
            .build()
            .with_context(|| format!("failed to read configuration {}", path.display()))?;

        let config: Self = settings
            .try_deserialize()
            .context("invalid configuration values")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("page_size must be greater than zero");
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            bail!("api_url must be an http(s) URL, got {}", self.api_url);
        }
        Ok(())
    }
}

/// Root directory for configuration and persisted client state.
pub fn config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
}

/// Location of the user configuration file.
pub fn config_path() -> PathBuf {
    config_root().join("config.toml")
}

/// Write a commented default configuration file if none exists yet.
pub fn ensure_default_config() -> Result<()> {
    write_default_config(config_path())
}

fn write_default_config(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let contents = format!(
        "# Automania client configuration\n\
         api_url = \"{DEFAULT_API_URL}\"\n\
         page_size = {DEFAULT_PAGE_SIZE}\n\
         request_timeout_secs = {DEFAULT_TIMEOUT_SECS}\n"
    );
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
