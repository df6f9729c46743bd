//! Service configuration.
//!
//! Configuration is read once at startup from `COURIER_*` environment
//! variables (the server binary layers CLI overrides on top) and is immutable
//! thereafter. Invalid values fail startup with a diagnostic rather than
//! falling back silently.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        /// Variable name.
        name: String,
        /// Rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(name: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Which long-lived tasks the process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceMode {
    /// Ingestion loop and management API together.
    #[default]
    Combined,
    /// Management API only.
    ApiOnly,
    /// Ingestion loop only.
    PubsubOnly,
}

impl ServiceMode {
    /// Whether this mode runs the management API.
    #[must_use]
    pub const fn serves_api(&self) -> bool {
        matches!(self, Self::Combined | Self::ApiOnly)
    }

    /// Whether this mode runs the ingestion loop.
    #[must_use]
    pub const fn consumes_events(&self) -> bool {
        matches!(self, Self::Combined | Self::PubsubOnly)
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "combined" => Some(Self::Combined),
            "api-only" => Some(Self::ApiOnly),
            "pubsub-only" => Some(Self::PubsubOnly),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Combined => f.write_str("combined"),
            Self::ApiOnly => f.write_str("api-only"),
            Self::PubsubOnly => f.write_str("pubsub-only"),
        }
    }
}

/// Which event-store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Durable file-backed store under `data_dir`.
    #[default]
    File,
    /// Volatile in-memory store.
    Memory,
}

impl StorageKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(Self::File),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// SMTP relay settings for the email provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay hostname.
    pub server: String,
    /// Relay port. With `use_ssl`, 465 selects TLS-on-connect and any other
    /// port selects STARTTLS.
    pub port: u16,
    /// Username; authentication is skipped when empty.
    pub user: String,
    /// Password.
    pub password: String,
    /// Whether to use TLS at all.
    pub use_ssl: bool,
    /// From address used when the caller supplies none.
    pub default_sender: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 465,
            user: String::new(),
            password: String::new(),
            use_ssl: true,
            default_sender: "courier@localhost".to_string(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Task selection for this process.
    pub service_mode: ServiceMode,
    /// Management API bind host.
    pub http_host: String,
    /// Management API port.
    pub http_port: u16,
    /// Event-store backend.
    pub storage: StorageKind,
    /// Base directory for the file store.
    pub data_dir: PathBuf,
    /// Logical name of the inbound subscription, used as a log tag.
    pub subscription_name: String,
    /// In-process queue depth.
    pub queue_capacity: usize,
    /// SMTP relay settings.
    pub smtp: SmtpConfig,
    /// Tracing filter directive.
    pub log_level: String,
    /// Emit JSON-formatted logs.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_mode: ServiceMode::Combined,
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            storage: StorageKind::File,
            data_dir: PathBuf::from("./data"),
            subscription_name: "event-subscription".to_string(),
            queue_capacity: 1024,
            smtp: SmtpConfig::default(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    /// Loads configuration from `COURIER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a variable is set to an unparseable
    /// value; missing variables fall back to documented defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// The seam the environment loader and the tests share.
    ///
    /// # Errors
    ///
    /// Same contract as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("COURIER_SERVICE_MODE") {
            config.service_mode = ServiceMode::parse(&value).ok_or_else(|| {
                ConfigError::invalid(
                    "COURIER_SERVICE_MODE",
                    &value,
                    "expected combined, api-only, or pubsub-only",
                )
            })?;
        }
        if let Some(value) = lookup("COURIER_HTTP_HOST") {
            config.http_host = value;
        }
        if let Some(value) = lookup("COURIER_HTTP_PORT") {
            config.http_port = parse_number("COURIER_HTTP_PORT", &value)?;
        }
        if let Some(value) = lookup("COURIER_STORAGE") {
            config.storage = StorageKind::parse(&value).ok_or_else(|| {
                ConfigError::invalid("COURIER_STORAGE", &value, "expected file or memory")
            })?;
        }
        if let Some(value) = lookup("COURIER_DATA_DIR") {
            config.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("COURIER_SUBSCRIPTION_NAME") {
            config.subscription_name = value;
        }
        if let Some(value) = lookup("COURIER_QUEUE_CAPACITY") {
            config.queue_capacity = parse_number("COURIER_QUEUE_CAPACITY", &value)?;
            if config.queue_capacity == 0 {
                return Err(ConfigError::invalid(
                    "COURIER_QUEUE_CAPACITY",
                    &value,
                    "must be greater than zero",
                ));
            }
        }
        if let Some(value) = lookup("COURIER_SMTP_SERVER") {
            config.smtp.server = value;
        }
        if let Some(value) = lookup("COURIER_SMTP_PORT") {
            config.smtp.port = parse_number("COURIER_SMTP_PORT", &value)?;
        }
        if let Some(value) = lookup("COURIER_SMTP_USER") {
            config.smtp.user = value;
        }
        if let Some(value) = lookup("COURIER_SMTP_PASSWORD") {
            config.smtp.password = value;
        }
        if let Some(value) = lookup("COURIER_SMTP_USE_SSL") {
            config.smtp.use_ssl = parse_bool("COURIER_SMTP_USE_SSL", &value)?;
        }
        if let Some(value) = lookup("COURIER_DEFAULT_SENDER") {
            config.smtp.default_sender = value;
        }
        if let Some(value) = lookup("COURIER_LOG_LEVEL") {
            config.log_level = value;
        }
        if let Some(value) = lookup("COURIER_LOG_JSON") {
            config.log_json = parse_bool("COURIER_LOG_JSON", &value)?;
        }

        Ok(config)
    }

    /// Returns the management API bind address.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(name, value, "expected a number"))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::invalid(name, value, "expected true or false")),
    }
}
