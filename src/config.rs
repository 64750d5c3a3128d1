//! Configuration management for Quotaguard.
//!
//! Settings are layered: an optional YAML file, then environment variables
//! prefixed with `QUOTAGUARD_` using `__` between nested keys, for example
//! `QUOTAGUARD_RULES__ENVIRONMENT=staging`.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::Result;

/// Main configuration for the Quotaguard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rule loading configuration
    #[serde(default)]
    pub rules: RulesSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default)]
    pub trust_proxy_headers: bool,

    /// Message returned to rejected clients
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_proxy_headers: false,
            rejection_message: default_rejection_message(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8082))
}

fn default_rejection_message() -> String {
    "Rate limit exceeded. Try again later.".to_string()
}

/// Which quota evaluator to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    /// Read the counter, then write it back
    #[default]
    Simple,
    /// Use the store's atomic increment
    Atomic,
}

/// Rule loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSettings {
    /// Path to the rules file
    pub path: Option<String>,

    /// Deployment environment whose rules apply, besides `*`
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Rules reload interval in seconds; 0 disables reloading
    #[serde(default)]
    pub reload_interval_secs: u64,

    #[serde(default)]
    pub evaluator: EvaluatorKind,
}

impl Default for RulesSettings {
    fn default() -> Self {
        Self {
            path: None,
            environment: default_environment(),
            reload_interval_secs: 0,
            evaluator: EvaluatorKind::default(),
        }
    }
}

fn default_environment() -> String {
    "production".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl GuardConfig {
    /// Load configuration from an optional file, overridden by environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        let settings = builder.add_source(env_source()).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("QUOTAGUARD")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
