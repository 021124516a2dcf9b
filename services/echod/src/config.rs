//! echod configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/wirecall/echod.toml`. Every field except
//! `schema_version` has a default, so the minimal valid config is
//! `schema_version = 1`.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use wc_endpoint::EndpointConfig;

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

/// Top-level echod configuration.
#[derive(Debug, Clone)]
pub struct EchodConfig {
    pub schema_version: u32,
    /// Address the serve mode binds to.
    pub bind: String,
    /// Diagnostic label prefix for endpoint log lines.
    pub label: String,
    /// Verbose per-packet endpoint logging.
    pub debug: bool,
    pub keepalive: KeepaliveConfig,
    /// Per-call timeout for outbound messages, in seconds.
    pub message_timeout_secs: f64,
}

#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    pub interval_secs: f64,
    pub timeout_secs: f64,
}

impl EchodConfig {
    /// Endpoint config for one connection, labelled with the peer address.
    pub fn endpoint_config(&self, peer: &str) -> EndpointConfig {
        EndpointConfig {
            label: format!("{}-{}", self.label, peer),
            debug: self.debug,
            keepalive_interval: Duration::from_secs_f64(self.keepalive.interval_secs),
            keepalive_timeout: Duration::from_secs_f64(self.keepalive.timeout_secs),
            message_timeout: Duration::from_secs_f64(self.message_timeout_secs),
        }
    }
}

impl Default for EchodConfig {
    fn default() -> EchodConfig {
        let defaults = EndpointConfig::default();
        EchodConfig {
            schema_version: 1,
            bind: "127.0.0.1:9917".to_owned(),
            label: "echod".to_owned(),
            debug: false,
            keepalive: KeepaliveConfig {
                interval_secs: defaults.keepalive_interval.as_secs_f64(),
                timeout_secs: defaults.keepalive_timeout.as_secs_f64(),
            },
            message_timeout_secs: defaults.message_timeout.as_secs_f64(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    bind: Option<String>,
    label: Option<String>,
    debug: Option<bool>,
    keepalive: Option<RawKeepaliveConfig>,
    message_timeout_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawKeepaliveConfig {
    interval_secs: Option<f64>,
    timeout_secs: Option<f64>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O: {0}")]
    Io(String),
    #[error("config parse: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load echod config from the default path `/etc/wirecall/echod.toml`.
pub fn load_config() -> Result<EchodConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/wirecall/echod.toml"))
}

/// Load echod config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<EchodConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load echod config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<EchodConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    let defaults = EchodConfig::default();

    let keepalive = match raw.keepalive {
        Some(k) => KeepaliveConfig {
            interval_secs: k.interval_secs.unwrap_or(defaults.keepalive.interval_secs),
            timeout_secs: k.timeout_secs.unwrap_or(defaults.keepalive.timeout_secs),
        },
        None => defaults.keepalive.clone(),
    };
    if keepalive.interval_secs <= 0.0 {
        return Err(ConfigError::InvalidValue(format!(
            "keepalive.interval_secs must be positive, got {}",
            keepalive.interval_secs
        )));
    }
    if keepalive.timeout_secs <= 0.0 {
        return Err(ConfigError::InvalidValue(format!(
            "keepalive.timeout_secs must be positive, got {}",
            keepalive.timeout_secs
        )));
    }

    let message_timeout_secs = raw.message_timeout_secs.unwrap_or(defaults.message_timeout_secs);
    if message_timeout_secs <= 0.0 {
        return Err(ConfigError::InvalidValue(format!(
            "message_timeout_secs must be positive, got {}",
            message_timeout_secs
        )));
    }

    Ok(EchodConfig {
        schema_version,
        bind: raw.bind.unwrap_or(defaults.bind),
        label: raw.label.unwrap_or(defaults.label),
        debug: raw.debug.unwrap_or(false),
        keepalive,
        message_timeout_secs,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
