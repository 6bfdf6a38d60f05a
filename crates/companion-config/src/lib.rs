//! SiYuan AI Companion configuration.
//!
//! All settings are read from environment variables, matching the deployment
//! contract of the companion container:
//!
//! | Variable | Default |
//! |---|---|
//! | `SIYUAN_URL` | `http://localhost:6806` |
//! | `SIYUAN_TOKEN` | unset |
//! | `QDRANT_LOCATION` | `http://localhost:6333` |
//! | `QDRANT_COLLECTION_NAME` | `siyuan_ai_companion` |
//! | `OPENAI_URL` | `https://api.openai.com/v1/` |
//! | `OPENAI_TOKEN` | unset |
//! | `COMPANION_TOKEN` | unset (auth disabled) |
//! | `FORCE_UPDATE_INDEX` | `false` |
//! | `COMPANION_LOGGING_LEVEL` | `info` |

mod error;

pub use error::ConfigError;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default SiYuan kernel URL.
pub const DEFAULT_SIYUAN_URL: &str = "http://localhost:6806";

/// Default Qdrant URL.
pub const DEFAULT_QDRANT_LOCATION: &str = "http://localhost:6333";

/// Default Qdrant collection name.
pub const DEFAULT_COLLECTION_NAME: &str = "siyuan_ai_companion";

/// Default upstream OpenAI-compatible API URL.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/";

/// Name of the cursor file holding the last successful sweep time.
pub const CURSOR_FILE_NAME: &str = "last_update";

/// Seconds between index sweeps.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Root configuration for the companion process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CompanionConfig {
    /// SiYuan kernel connection
    pub siyuan: SiyuanConfig,

    /// Vector store connection
    pub qdrant: QdrantConfig,

    /// Upstream OpenAI-compatible API
    pub openai: OpenAiConfig,

    /// Companion HTTP surface
    pub server: ServerConfig,

    /// Index sweep scheduling
    pub indexer: IndexerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// SiYuan kernel connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiyuanConfig {
    /// Base URL of the SiYuan kernel API
    pub url: String,

    /// API token, sent as `Authorization: Token <token>`
    pub token: Option<String>,
}

impl Default for SiyuanConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SIYUAN_URL.to_string(),
            token: None,
        }
    }
}

/// Qdrant connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    /// Qdrant server URL
    pub location: String,

    /// Collection holding the block index
    pub collection_name: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            location: DEFAULT_QDRANT_LOCATION.to_string(),
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
        }
    }
}

/// Upstream OpenAI-compatible API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Base URL of the upstream API
    pub url: String,

    /// Bearer token injected into forwarded requests.
    /// When unset, the caller's `Authorization` header is stripped and
    /// nothing is sent upstream in its place.
    pub token: Option<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OPENAI_URL.to_string(),
            token: None,
        }
    }
}

/// Companion HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Shared bearer token required on every endpoint except `/health`.
    /// Unset disables authentication.
    pub companion_token: Option<String>,
}

/// Index sweep scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,

    /// Delete the cursor file before the first sweep, forcing a full reindex
    pub force_update_index: bool,

    /// Path of the cursor file
    pub cursor_path: PathBuf,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            force_update_index: false,
            cursor_path: PathBuf::from(CURSOR_FILE_NAME),
        }
    }
}

impl IndexerConfig {
    /// Sweep interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter: error, warn, info, debug or trace
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CompanionConfig {
    /// Load configuration from the process environment.
    ///
    /// Unset variables keep their defaults; empty strings count as unset for
    /// the optional tokens so compose files can pass them through verbatim.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = env_var("SIYUAN_URL") {
            config.siyuan.url = url;
        }
        config.siyuan.token = env_var("SIYUAN_TOKEN");

        if let Some(location) = env_var("QDRANT_LOCATION") {
            config.qdrant.location = location;
        }
        if let Some(name) = env_var("QDRANT_COLLECTION_NAME") {
            config.qdrant.collection_name = name;
        }

        if let Some(url) = env_var("OPENAI_URL") {
            config.openai.url = url;
        }
        config.openai.token = env_var("OPENAI_TOKEN");
        config.server.companion_token = env_var("COMPANION_TOKEN");

        if let Some(raw) = env_var("FORCE_UPDATE_INDEX") {
            config.indexer.force_update_index = parse_bool("FORCE_UPDATE_INDEX", &raw)?;
        }

        if let Some(level) = env_var("COMPANION_LOGGING_LEVEL") {
            config.logging.level = validate_level(&level)?;
        }

        tracing::debug!(
            siyuan_url = %config.siyuan.url,
            qdrant_location = %config.qdrant.location,
            collection = %config.qdrant.collection_name,
            "configuration loaded from environment"
        );

        Ok(config)
    }

    /// Whether the companion surface requires authentication.
    pub fn auth_enabled(&self) -> bool {
        self.server.companion_token.is_some()
    }
}

/// Read an environment variable, treating empty values as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a boolean environment value (`true`/`false`/`1`/`0`, case-insensitive).
fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::invalid_value(
            key,
            format!("expected a boolean, got '{other}'"),
        )),
    }
}

/// Validate a log level name, normalising to lowercase.
fn validate_level(raw: &str) -> Result<String, ConfigError> {
    let level = raw.trim().to_lowercase();
    match level.as_str() {
        "error" | "warn" | "info" | "debug" | "trace" => Ok(level),
        other => Err(ConfigError::invalid_value(
            "COMPANION_LOGGING_LEVEL",
            format!("unknown log level '{other}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = CompanionConfig::default();
        assert_eq!(config.siyuan.url, DEFAULT_SIYUAN_URL);
        assert!(config.siyuan.token.is_none());
        assert_eq!(config.qdrant.location, DEFAULT_QDRANT_LOCATION);
        assert_eq!(config.qdrant.collection_name, DEFAULT_COLLECTION_NAME);
        assert_eq!(config.openai.url, DEFAULT_OPENAI_URL);
        assert!(!config.indexer.force_update_index);
        assert_eq!(config.indexer.interval(), Duration::from_secs(300));
        assert_eq!(config.indexer.cursor_path, PathBuf::from("last_update"));
        assert_eq!(config.logging.level, "info");
        assert!(!config.auth_enabled());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "True").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "false").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_validate_level() {
        assert_eq!(validate_level("INFO").unwrap(), "info");
        assert_eq!(validate_level("debug").unwrap(), "debug");
        assert!(validate_level("loud").is_err());
    }

    #[test]
    fn test_auth_enabled() {
        let mut config = CompanionConfig::default();
        config.server.companion_token = Some("secret".to_string());
        assert!(config.auth_enabled());
    }
}
