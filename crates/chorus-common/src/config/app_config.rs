//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use chorus_core::Intents;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub rest: RestConfig,
    pub gateway: GatewayConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// REST dispatcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    /// Bot token, sent as `Authorization: Bot <token>`
    pub token: String,
    /// Base URL without the version segment
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_version")]
    pub api_version: u8,
    /// Wall-clock timeout for a single HTTP call
    #[serde(default = "default_rest_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries for transport failures and 5xx responses
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Appended to the user agent string
    #[serde(default)]
    pub user_agent_suffix: Option<String>,
    /// Worker id stamped into generated request ids
    #[serde(default = "default_worker_id")]
    pub worker_id: u8,
}

impl RestConfig {
    /// Create a configuration with defaults for everything but the token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: default_api_base(),
            api_version: default_api_version(),
            timeout_ms: default_rest_timeout_ms(),
            retry_limit: default_retry_limit(),
            user_agent_suffix: None,
            worker_id: default_worker_id(),
        }
    }

    /// Override the API base URL
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Versioned base URL, e.g. `https://discord.com/api/v10`
    #[must_use]
    pub fn versioned_base(&self) -> String {
        format!("{}/v{}", self.api_base.trim_end_matches('/'), self.api_version)
    }
}

/// Gateway wire encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    Etf,
}

impl Encoding {
    /// Value of the `encoding` query parameter
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Etf => "etf",
        }
    }
}

impl FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "etf" => Ok(Self::Etf),
            other => Err(ConfigError::InvalidValue("CHORUS_ENCODING", other.to_string())),
        }
    }
}

/// Gateway compression mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    /// Uncompressed frames
    None,
    /// Large payloads arrive as individually zlib-compressed binary frames
    Payload,
    /// One continuous zlib stream for the whole connection
    #[default]
    ZlibStream,
}

impl FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "payload" => Ok(Self::Payload),
            "zlib-stream" => Ok(Self::ZlibStream),
            other => Err(ConfigError::InvalidValue("CHORUS_COMPRESSION", other.to_string())),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_version")]
    pub version: u8,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub compression: Compression,
    /// Requested shard count; raised to the recommended count when lower
    #[serde(default)]
    pub shard_count: Option<u32>,
    #[serde(default)]
    pub intents: Intents,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u16,
    /// Give up on a WebSocket handshake after this long
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: default_gateway_version(),
            encoding: Encoding::default(),
            compression: Compression::default(),
            shard_count: None,
            intents: Intents::default(),
            large_threshold: default_large_threshold(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "chorus".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_api_base() -> String {
    "https://discord.com/api".to_string()
}

fn default_api_version() -> u8 {
    10
}

fn default_gateway_version() -> u8 {
    10
}

fn default_rest_timeout_ms() -> u64 {
    15_000
}

fn default_retry_limit() -> u32 {
    1
}

fn default_worker_id() -> u8 {
    1
}

fn default_large_threshold() -> u16 {
    50
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn parsed<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CHORUS_TOKEN` is missing or a variable fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let token = env::var("CHORUS_TOKEN").map_err(|_| ConfigError::MissingVar("CHORUS_TOKEN"))?;

        let intents = match env::var("CHORUS_INTENTS") {
            Ok(raw) => Intents::parse(&raw).map_err(|_| ConfigError::InvalidValue("CHORUS_INTENTS", raw))?,
            Err(_) => Intents::default(),
        };

        let worker_id = parsed::<u8>("CHORUS_WORKER_ID")?.unwrap_or_else(default_worker_id);
        if worker_id >= 32 {
            return Err(ConfigError::InvalidValue("CHORUS_WORKER_ID", worker_id.to_string()));
        }

        Ok(Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| match s.to_lowercase().as_str() {
                        "production" => Some(Environment::Production),
                        "staging" => Some(Environment::Staging),
                        "development" => Some(Environment::Development),
                        _ => None,
                    })
                    .unwrap_or_default(),
            },
            rest: RestConfig {
                token,
                api_base: env::var("CHORUS_API_BASE").unwrap_or_else(|_| default_api_base()),
                api_version: parsed("CHORUS_API_VERSION")?.unwrap_or_else(default_api_version),
                timeout_ms: parsed("CHORUS_REST_TIMEOUT_MS")?.unwrap_or_else(default_rest_timeout_ms),
                retry_limit: parsed("CHORUS_RETRY_LIMIT")?.unwrap_or_else(default_retry_limit),
                user_agent_suffix: env::var("CHORUS_USER_AGENT_SUFFIX").ok(),
                worker_id,
            },
            gateway: GatewayConfig {
                version: parsed("CHORUS_GATEWAY_VERSION")?.unwrap_or_else(default_gateway_version),
                encoding: parsed("CHORUS_ENCODING")?.unwrap_or_default(),
                compression: parsed("CHORUS_COMPRESSION")?.unwrap_or_default(),
                shard_count: parsed("CHORUS_SHARD_COUNT")?,
                intents,
                large_threshold: parsed("CHORUS_LARGE_THRESHOLD")?.unwrap_or_else(default_large_threshold),
                connect_timeout_ms: parsed("CHORUS_CONNECT_TIMEOUT_MS")?
                    .unwrap_or_else(default_connect_timeout_ms),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
