//! Configuration types for sluice.
//!
//! [`Config::load`] layers, lowest precedence first: the embedded defaults,
//! an optional TOML file, then `SLUICE_*` environment variables with `__`
//! separating sections (`SLUICE_STREAM__BROKERS=nats://a:4222`).
//! [`Config::defaults`] returns the embedded defaults without touching the
//! filesystem or the environment (useful in tests).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::classify::DEFAULT_CONTROLLER_CONTAINER;
use crate::store::{ElasticsearchConfig, DEFAULT_CAPACITY};
use crate::types::Encoding;

pub use config::ConfigError;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
log_level = "info"

[stream]
brokers              = "nats://localhost:4222"
stream_name          = "LOGS"
topic                = "logs.>"
group_id             = "sluice-logs-consumer"
tail_group_prefix    = "sluice-tail"
message_type         = "json"
connect_timeout_secs = 10
stop_timeout_secs    = 1

[store]
backend  = "memory"
capacity = 1000

[store.elasticsearch]
host              = "localhost"
port              = 9200
index_template    = "sluice-{app}"
batch_size        = 50
flush_interval_ms = 1000

[classifier]
controller_container = "deis-controller"

[http]
bind = "0.0.0.0:8088"
"#;

const ENV_PREFIX: &str = "SLUICE";

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_log_level() -> String { "info".to_string() }

/// `[stream]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Comma separated broker URLs.
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Subject pattern every consumer subscribes to.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Shared by every ingesting instance so they split the stream.
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_tail_group_prefix")]
    pub tail_group_prefix: String,
    #[serde(default)]
    pub message_type: Encoding,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_brokers() -> String { "nats://localhost:4222".to_string() }
fn default_stream_name() -> String { "LOGS".to_string() }
fn default_topic() -> String { "logs.>".to_string() }
fn default_group_id() -> String { "sluice-logs-consumer".to_string() }
fn default_tail_group_prefix() -> String { "sluice-tail".to_string() }
fn default_connect_timeout_secs() -> u64 { 10 }
fn default_stop_timeout_secs() -> u64 { 1 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            stream_name: default_stream_name(),
            topic: default_topic(),
            group_id: default_group_id(),
            tail_group_prefix: default_tail_group_prefix(),
            message_type: Encoding::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Elasticsearch,
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Lines kept per application.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
}

fn default_capacity() -> usize { DEFAULT_CAPACITY }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            capacity: default_capacity(),
            elasticsearch: ElasticsearchConfig::default(),
        }
    }
}

/// `[classifier]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_controller_container")]
    pub controller_container: String,
}

fn default_controller_container() -> String { DEFAULT_CONTROLLER_CONTAINER.to_string() }

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            controller_container: default_controller_container(),
        }
    }
}

/// `[http]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String { "0.0.0.0:8088".to_string() }

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
