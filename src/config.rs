//! Runtime configuration from environment variables.

use std::time::Duration;

use thiserror::Error;

use crate::registry::RegistryClientConfig;
use crate::registry::client::{DEFAULT_LIST_TIMEOUT, DEFAULT_PING_TIMEOUT};

pub const CERT_PATH_ENV: &str = "TAG_RESOLVER_CERT_PATH";
pub const KEY_PATH_ENV: &str = "TAG_RESOLVER_KEY_PATH";
pub const PORT_ENV: &str = "TAG_RESOLVER_PORT";
pub const HEALTH_PORT_ENV: &str = "TAG_RESOLVER_HEALTH_PORT";
pub const PING_TIMEOUT_ENV: &str = "TAG_RESOLVER_PING_TIMEOUT_SECS";
pub const LIST_TIMEOUT_ENV: &str = "TAG_RESOLVER_LIST_TIMEOUT_SECS";
pub const PLAIN_HTTP_REGISTRIES_ENV: &str = "TAG_RESOLVER_PLAIN_HTTP_REGISTRIES";

/// Default path to webhook TLS certificate
pub const DEFAULT_CERT_PATH: &str = "/certs/tls.crt";
/// Default path to webhook TLS private key
pub const DEFAULT_KEY_PATH: &str = "/certs/tls.key";
/// Default webhook server port
pub const DEFAULT_PORT: u16 = 8443;
/// Default health server port
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a port number, got {value:?}")]
    InvalidPort { var: &'static str, value: String },

    #[error("{var} must be a positive number of seconds, got {value:?}")]
    InvalidTimeout { var: &'static str, value: String },
}

/// Webhook process configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookConfig {
    pub cert_path: String,
    pub key_path: String,
    pub port: u16,
    pub health_port: u16,
    pub ping_timeout: Duration,
    pub list_timeout: Duration,
    pub plain_http_registries: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            cert_path: DEFAULT_CERT_PATH.to_string(),
            key_path: DEFAULT_KEY_PATH.to_string(),
            port: DEFAULT_PORT,
            health_port: DEFAULT_HEALTH_PORT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            list_timeout: DEFAULT_LIST_TIMEOUT,
            plain_http_registries: Vec::new(),
        }
    }
}

impl WebhookConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` to read variables; unset or empty means default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            cert_path: get(CERT_PATH_ENV).unwrap_or(defaults.cert_path),
            key_path: get(KEY_PATH_ENV).unwrap_or(defaults.key_path),
            port: get(PORT_ENV)
                .map(|v| parse_port(PORT_ENV, &v))
                .transpose()?
                .unwrap_or(defaults.port),
            health_port: get(HEALTH_PORT_ENV)
                .map(|v| parse_port(HEALTH_PORT_ENV, &v))
                .transpose()?
                .unwrap_or(defaults.health_port),
            ping_timeout: get(PING_TIMEOUT_ENV)
                .map(|v| parse_timeout(PING_TIMEOUT_ENV, &v))
                .transpose()?
                .unwrap_or(defaults.ping_timeout),
            list_timeout: get(LIST_TIMEOUT_ENV)
                .map(|v| parse_timeout(LIST_TIMEOUT_ENV, &v))
                .transpose()?
                .unwrap_or(defaults.list_timeout),
            plain_http_registries: get(PLAIN_HTTP_REGISTRIES_ENV)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|h| !h.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Registry client settings derived from this configuration.
    pub fn registry_client_config(&self) -> RegistryClientConfig {
        self.plain_http_registries.iter().fold(
            RegistryClientConfig::default()
                .with_ping_timeout(self.ping_timeout)
                .with_list_timeout(self.list_timeout),
            |config, host| config.with_plain_http_host(host.clone()),
        )
    }
}

fn parse_port(var: &'static str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| ConfigError::InvalidPort {
            var,
            value: value.to_string(),
        })
}

fn parse_timeout(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidTimeout {
            var,
            value: value.to_string(),
        })
}
