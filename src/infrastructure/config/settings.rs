use std::env;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::auth::Credentials;
use crate::error::{AppError, Result};

/// Env files searched before the process environment is read
const ENV_FILES: [&str; 2] = [".env.local", ".env"];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("account_id", &self.account_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Base URL of the OAuth service, `token` is appended to it
    #[serde(default = "default_oauth_base_url")]
    pub base_url: String,
    /// Timeout for the token request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Subscription URL, already carrying its own query string
    #[serde(default)]
    pub url: String,
    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Fraction of the interval a heartbeat may fire early (0.0 = fixed interval)
    #[serde(default)]
    pub heartbeat_jitter: f64,
    /// Handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Capacity of the outbound frame channel
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_oauth_base_url() -> String {
    "https://zoom.us/oauth/".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_outbound_buffer() -> usize {
    32
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from env files, optional config files and the process
    /// environment, then validate them.
    pub fn new() -> Result<Self> {
        for path in ENV_FILES {
            load_env_file(path)?;
        }

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // ZOOM_WEBSOCKET__HEARTBEAT_INTERVAL, ZOOM_LOGGING__FORMAT, etc.
            .add_source(
                Environment::with_prefix("ZOOM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            // Flat names used by the `.env.local` files of existing deployments
            .set_override_option("credentials.account_id", env::var("accountId").ok())?
            .set_override_option("credentials.client_id", env::var("clientId").ok())?
            .set_override_option("credentials.client_secret", env::var("clientSecret").ok())?
            .set_override_option("websocket.url", env::var("url").ok())?;

        Self::from_builder(builder)
    }

    fn defaults() -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("oauth.base_url", default_oauth_base_url())?
            .set_default("oauth.request_timeout_secs", default_request_timeout() as i64)?
            .set_default("websocket.heartbeat_interval", default_heartbeat_interval() as i64)?
            .set_default("websocket.heartbeat_jitter", 0.0)?
            .set_default("websocket.connect_timeout_secs", default_connect_timeout() as i64)?
            .set_default("websocket.outbound_buffer", default_outbound_buffer() as i64)?
            .set_default("logging.format", "pretty")?
            .set_default("logging.level", default_log_level())
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject blank credentials and out-of-range tuning values
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("accountId", &self.credentials.account_id),
            ("clientId", &self.credentials.client_id),
            ("clientSecret", &self.credentials.client_secret),
            ("url", &self.websocket.url),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(AppError::MissingSetting(missing.join(", ")));
        }

        if self.websocket.heartbeat_interval == 0 {
            return Err(AppError::invalid_setting(
                "websocket.heartbeat_interval",
                "must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.websocket.heartbeat_jitter) {
            return Err(AppError::invalid_setting(
                "websocket.heartbeat_jitter",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.websocket.outbound_buffer == 0 {
            return Err(AppError::invalid_setting(
                "websocket.outbound_buffer",
                "must be greater than zero",
            ));
        }

        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.credentials.account_id.clone(),
            self.credentials.client_id.clone(),
            self.credentials.client_secret.clone(),
        )
    }
}

/// Load an env file if present. A missing file is skipped, an unreadable or
/// malformed one is an error.
fn load_env_file(path: &str) -> Result<()> {
    match dotenvy::from_filename(path) {
        Ok(_) => Ok(()),
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::invalid_setting(path, e.to_string())),
    }
}

impl OAuthConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            base_url: default_oauth_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_jitter: 0.0,
            connect_timeout_secs: default_connect_timeout(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}
