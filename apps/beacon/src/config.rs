// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::Level;

use beacon_pubsub::{build_node_group, Configuration, Key, NodeGroup};

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Output format for file logging.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

const fn default_true() -> bool {
    true
}

fn default_log_file_path() -> String {
    "logs/beacon.log".to_string()
}

/// Logging configuration: console and file sinks with separate levels.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub console_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default = "default_log_file_path")]
    pub file_path: String,
    #[serde(default)]
    pub file_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            console_level: LogLevel::default(),
            file_enable: false,
            file_level: LogLevel::default(),
            file_path: default_log_file_path(),
            file_format: LogFormat::default(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

/// HTTP server configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ServerConfig {
    /// Address and port to bind, e.g. "0.0.0.0:8080".
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: default_address() }
    }
}

const fn default_node_timeout_secs() -> u64 {
    30
}

const fn default_max_update_size() -> usize {
    1024
}

const fn default_max_messages_per_client() -> usize {
    20
}

const fn default_max_messages_size_per_client() -> usize {
    4096
}

const fn default_session_timeout_secs() -> u64 {
    30
}

const fn default_long_polling_timeout_secs() -> u64 {
    20
}

/// The pub/sub tuning knobs, serde-friendly. Durations are in seconds
/// except `min_update_period_ms`, which usually wants sub-second values.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct PubSubConfig {
    /// Seconds an empty node stays in the data model.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    /// Minimum spacing between pushes of one node, in milliseconds.
    #[serde(default)]
    pub min_update_period_ms: u64,
    /// Byte budget for delta scripts; larger updates send the full value.
    #[serde(default = "default_max_update_size")]
    pub max_update_size: usize,
    /// Whether subscriptions require the adapter's authorization.
    #[serde(default = "default_true")]
    pub authorization_required: bool,
    /// Count cap of a session's message buffer.
    #[serde(default = "default_max_messages_per_client")]
    pub max_messages_per_client: usize,
    /// Byte cap of a session's message buffer.
    #[serde(default = "default_max_messages_size_per_client")]
    pub max_messages_size_per_client: usize,
    /// Seconds an idle session survives between polls.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Seconds a long poll is held open.
    #[serde(default = "default_long_polling_timeout_secs")]
    pub long_polling_timeout_secs: u64,
    /// Per-node-group overrides, first match wins.
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupConfig>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: default_node_timeout_secs(),
            min_update_period_ms: 0,
            max_update_size: default_max_update_size(),
            authorization_required: true,
            max_messages_per_client: default_max_messages_per_client(),
            max_messages_size_per_client: default_max_messages_size_per_client(),
            session_timeout_secs: default_session_timeout_secs(),
            long_polling_timeout_secs: default_long_polling_timeout_secs(),
            groups: Vec::new(),
        }
    }
}

impl PubSubConfig {
    /// The engine-side default configuration.
    pub fn to_configuration(&self) -> Configuration {
        Configuration::new()
            .with_node_timeout(Duration::from_secs(self.node_timeout_secs))
            .with_min_update_period(Duration::from_millis(self.min_update_period_ms))
            .with_max_update_size(self.max_update_size)
            .with_authorization_required(self.authorization_required)
            .with_max_messages_per_client(self.max_messages_per_client)
            .with_max_messages_size_per_client(self.max_messages_size_per_client)
            .with_session_timeout(Duration::from_secs(self.session_timeout_secs))
            .with_long_polling_timeout(Duration::from_secs(self.long_polling_timeout_secs))
    }
}

/// One `[[pubsub.group]]` entry: which nodes it covers and which knobs it
/// overrides.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct GroupConfig {
    /// Domains a node name must contain to fall into this group.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Exact `(domain, value)` keys the name must contain.
    #[serde(default)]
    pub keys: HashMap<String, String>,
    #[serde(default)]
    pub node_timeout_secs: Option<u64>,
    #[serde(default)]
    pub min_update_period_ms: Option<u64>,
    #[serde(default)]
    pub max_update_size: Option<usize>,
    #[serde(default)]
    pub authorization_required: Option<bool>,
}

impl GroupConfig {
    pub fn to_group(&self) -> NodeGroup {
        let mut group = build_node_group();
        for domain in &self.domains {
            group = group.has_domain(domain.as_str());
        }
        for (domain, value) in &self.keys {
            group = group.has_key(Key::new(domain.as_str(), value.as_str()));
        }
        group
    }

    /// The group's configuration: the default with this entry's
    /// overrides applied.
    pub fn to_configuration(&self, base: &Configuration) -> Configuration {
        let mut config = base.clone();
        if let Some(secs) = self.node_timeout_secs {
            config = config.with_node_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = self.min_update_period_ms {
            config = config.with_min_update_period(Duration::from_millis(ms));
        }
        if let Some(bytes) = self.max_update_size {
            config = config.with_max_update_size(bytes);
        }
        if let Some(required) = self.authorization_required {
            config = config.with_authorization_required(required);
        }
        config
    }
}

/// Complete server configuration.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
}

/// A loaded configuration plus where it (did not) come from.
pub struct ConfigLoadResult {
    pub config: Config,
    /// Set when the config file was missing and defaults were used.
    pub file_missing: Option<String>,
}

/// Loads the configuration: TOML file layered under `BEACON_*`
/// environment variables.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be parsed, or when a
/// value has the wrong shape.
pub fn load(path: &str) -> Result<ConfigLoadResult, figment::Error> {
    let file_missing =
        (!std::path::Path::new(path).exists()).then(|| path.to_string());

    let config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("BEACON_").split("__"))
        .extract()?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Renders the default configuration as a TOML document.
///
/// # Errors
///
/// Returns an error when serialization fails.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    toml::to_string(&Config::default())
}
