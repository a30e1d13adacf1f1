//! Configuration management for ConvoNest.
//!
//! Loads configuration from ${CONVONEST_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Identity provider settings (Identity Toolkit REST endpoints).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Public web API key of the identity project.
    pub api_key: Option<String>,
    /// Base URL for `accounts:*` calls.
    pub auth_url: String,
    /// Base URL for the secure-token refresh endpoint.
    pub token_url: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            auth_url: IdentityConfig::DEFAULT_AUTH_URL.to_string(),
            token_url: IdentityConfig::DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

impl IdentityConfig {
    const DEFAULT_AUTH_URL: &str = "https://identitytoolkit.googleapis.com";
    const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com";
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the forum backend
    pub api_url: String,

    /// Per-request timeout in seconds (0 disables)
    pub request_timeout_secs: u64,

    /// Posts per page in listings
    pub page_size: usize,

    /// Optional path of a log file (in addition to stderr)
    pub log_file: Option<String>,

    #[serde(default)]
    pub identity: IdentityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: Config::DEFAULT_API_URL.to_string(),
            request_timeout_secs: Config::DEFAULT_REQUEST_TIMEOUT_SECS,
            page_size: Config::DEFAULT_PAGE_SIZE,
            log_file: None,
            identity: IdentityConfig::default(),
        }
    }
}

impl Config {
    const DEFAULT_API_URL: &str = "http://localhost:5000";
    const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
    pub const DEFAULT_PAGE_SIZE: usize = 5;

    /// Loads configuration from the default config path, then applies env overrides.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// an override is not a valid URL.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_path())?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        } else {
            Config::default()
        };
        config
            .validate()
            .with_context(|| format!("Invalid config at {}", path.display()))?;
        Ok(config)
    }

    /// Env wins over the file: `CONVONEST_API_URL`, `CONVONEST_IDENTITY_API_KEY`,
    /// `CONVONEST_IDENTITY_URL`, `CONVONEST_TOKEN_URL`.
    ///
    /// # Errors
    /// Returns an error if an overriding URL is malformed.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(url) = env_value("CONVONEST_API_URL") {
            validate_url(&url, "API")?;
            self.api_url = url;
        }
        if let Some(key) = env_value("CONVONEST_IDENTITY_API_KEY") {
            self.identity.api_key = Some(key);
        }
        if let Some(url) = env_value("CONVONEST_IDENTITY_URL") {
            validate_url(&url, "identity")?;
            self.identity.auth_url = url;
        }
        if let Some(url) = env_value("CONVONEST_TOKEN_URL") {
            validate_url(&url, "token")?;
            self.identity.token_url = url;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_url(&self.api_url, "API")?;
        if self.page_size == 0 {
            anyhow::bail!("page_size must be at least 1");
        }
        Ok(())
    }

    /// Returns the request timeout, or `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Initializes a new config file with the commented template.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Returns the log file path, resolving relative paths against the home dir.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        let raw = self.log_file.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let path = PathBuf::from(raw);
        Some(if path.is_absolute() {
            path
        } else {
            paths::convonest_home().join(path)
        })
    }
}

/// Returns the default config template with comments.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate_url(url: &str, label: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid {label} base URL: {url}"))?;
    Ok(())
}

pub mod paths {
    //! Path resolution for ConvoNest configuration and session data.
    //!
    //! CONVONEST_HOME resolution order:
    //! 1. CONVONEST_HOME environment variable (if set)
    //! 2. ~/.config/convonest (default)
    //! 3. ./.convonest when no home directory can be determined

    use std::path::PathBuf;

    pub fn convonest_home() -> PathBuf {
        if let Ok(home) = std::env::var("CONVONEST_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".convonest"),
            |h| h.join(".config").join("convonest"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        convonest_home().join("config.toml")
    }

    /// Returns the path to the persisted session credentials.
    pub fn session_path() -> PathBuf {
        convonest_home().join("session.json")
    }
}
