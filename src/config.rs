use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::caching::DEFAULT_VALIDATION_HEADER;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub http: HttpConfig,
    pub cache: CacheConfig,
}

impl ClientConfig {
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            http: HttpConfig {
                host: host.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL relative paths are appended to
    pub host: String,
    /// Basic auth user name
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    pub user_agent: String,
    pub accept: String,
    pub content_type: String,
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
}

/// Conditional cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether GETs go through the conditional cache
    pub enabled: bool,
    /// Disk store directory
    pub directory: PathBuf,
    /// Maximum number of entries in memory store
    pub max_memory_entries: u64,
    /// Memory store TTL in seconds
    pub memory_ttl_seconds: u64,
    /// Query parameters left out of cache keys
    pub ignore_params: Vec<String>,
    /// Response header used as the validator
    pub validation_header: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: None,
            password: None,
            user_agent: format!("restmap/{}", env!("CARGO_PKG_VERSION")),
            accept: "application/xml".to_string(),
            content_type: "application/xml".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("restmap"),
            max_memory_entries: 1000,
            memory_ttl_seconds: 3600, // 1 hour
            ignore_params: Vec::new(),
            validation_header: DEFAULT_VALIDATION_HEADER.to_string(),
        }
    }
}

/// Configuration manager for loading and checking configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment
    pub async fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path).await?,
            None => Self::find_config_file().await?.unwrap_or_default(),
        };

        config = Self::apply_environment_overrides(config)?;
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<ClientConfig> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<ClientConfig>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<ClientConfig>> {
        let config_names = ["restmap.toml", "restmap.json", ".restmap.toml", ".restmap.json"];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("restmap");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: ClientConfig) -> Result<ClientConfig> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: ClientConfig,
    ) -> Result<ClientConfig> {
        // Transport settings
        if let Some(host) = env.get("RESTMAP_HOST") {
            config.http.host = host;
        }

        if let Some(username) = env.get("RESTMAP_USERNAME") {
            config.http.username = Some(username);
        }

        if let Some(password) = env.get("RESTMAP_PASSWORD") {
            config.http.password = Some(password);
        }

        if let Some(timeout) = env.get("RESTMAP_TIMEOUT") {
            config.http.timeout_seconds = timeout.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid RESTMAP_TIMEOUT value: {}", timeout))
            })?;
        }

        // Cache settings
        if let Some(cache_dir) = env.get("RESTMAP_CACHE_DIR") {
            config.cache.directory = PathBuf::from(cache_dir);
        }

        if let Some(enabled) = env.get("RESTMAP_CACHE_ENABLED") {
            config.cache.enabled = enabled.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid RESTMAP_CACHE_ENABLED value: {}", enabled))
            })?;
        }

        if let Some(params) = env.get("RESTMAP_IGNORE_PARAMS") {
            config.cache.ignore_params = params
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate_config(config: &ClientConfig) -> Result<()> {
        if config.http.host.is_empty() {
            return Err(ConfigError::Validation("Host must be specified".to_string()));
        }

        if let Err(e) = Url::parse(&config.http.host) {
            return Err(ConfigError::Validation(format!(
                "Invalid host URL {}: {}",
                config.http.host, e
            )));
        }

        if config.http.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.cache.max_memory_entries == 0 {
            return Err(ConfigError::Validation(
                "Cache memory entries must be greater than 0".to_string(),
            ));
        }

        if config.cache.validation_header.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Validation header must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Convert configuration to Duration for request timeout
    pub fn get_timeout_duration(config: &ClientConfig) -> Duration {
        Duration::from_secs(config.http.timeout_seconds)
    }

    /// Convert configuration to Duration for memory store TTL
    pub fn get_memory_ttl_duration(config: &ClientConfig) -> Duration {
        Duration::from_secs(config.cache.memory_ttl_seconds)
    }
}
