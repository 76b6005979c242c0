//! Service configuration
//!
//! A single TOML file (overridable per-key through `CRYOSRV_*` environment
//! variables) supplies the broker and database connections, the command
//! queue topics, the legacy telemetry mirrors, the optional compatibility
//! sink, and the device registry itself.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::core::device::DeviceInstance;
use crate::core::scheduler::FailurePolicy;
use crate::error::{CryoSrvError, Result};
use crate::transport::TransportSettings;

/// Top-level configuration model.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    /// Broker connections, keyed by the names devices refer to
    pub brokers: HashMap<String, BrokerConfig>,
    /// Time-series connections, keyed by the names devices refer to
    #[serde(default)]
    pub databases: HashMap<String, DatabaseConfig>,
    /// Command queue topics
    pub queue: QueueConfig,
    /// Legacy telemetry mirror topics
    #[serde(default)]
    pub legacy_topics: Vec<LegacyTopicConfig>,
    /// Legacy fixed-width export sink
    #[serde(default)]
    pub compat: Option<CompatConfig>,
    /// The device registry
    #[serde(default)]
    pub devices: Vec<DeviceInstance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_description")]
    pub description: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            description: default_service_description(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log directory; unset means console only
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

/// Main-loop and transport pacing.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    /// Pause between job registrations, staggering first fires
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    /// Nap increment inside the main loop; must stay <= 1s so shutdown
    /// signals are honored promptly
    #[serde(default = "default_nap_ms")]
    pub nap_ms: u64,
    /// What a failed job body does to its schedule
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Wire string a proxy device publishes on each "poll"
    #[serde(default = "default_proxy_command")]
    pub proxy_command: String,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            stagger_ms: default_stagger_ms(),
            nap_ms: default_nap_ms(),
            failure_policy: FailurePolicy::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            proxy_command: default_proxy_command(),
        }
    }
}

impl RuntimeSection {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn nap(&self) -> Duration {
        Duration::from_millis(self.nap_ms.min(1000))
    }

    pub fn transport(&self) -> TransportSettings {
        TransportSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub qos: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

/// Command/reply topics and the broker carrying them.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub broker: String,
    pub cmd_topic: String,
    pub reply_topic: String,
}

/// One legacy free-text telemetry topic and its destination row.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyTopicConfig {
    pub topic: String,
    pub measurement: String,
    #[serde(default = "default_legacy_label")]
    pub device_label: String,
    pub database: String,
}

/// Legacy fixed-width export sink.
#[derive(Debug, Clone, Deserialize)]
pub struct CompatConfig {
    #[serde(default)]
    pub enabled: bool,
    pub path: PathBuf,
    /// Instrument whose devices feed the sink
    pub instrument: String,
}

fn default_service_name() -> String {
    "cryosrv".to_string()
}

fn default_service_description() -> String {
    "Instrument cooling telemetry and control".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stagger_ms() -> u64 {
    2500
}

fn default_nap_ms() -> u64 {
    250
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_write_timeout_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_proxy_command() -> String {
    "gettemp".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    format!("cryosrv-{}", std::process::id())
}

fn default_legacy_label() -> String {
    "arc-loisgettemp".to_string()
}

impl ServiceConfig {
    /// Load from a TOML file with `CRYOSRV_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let config: ServiceConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CRYOSRV_").split("__"))
            .extract()
            .map_err(|err| CryoSrvError::config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation: unique device tags, positive intervals,
    /// and every connection key resolvable.
    pub fn validate(&self) -> Result<()> {
        if !self.brokers.contains_key(&self.queue.broker) {
            return Err(CryoSrvError::config(format!(
                "queue references unknown broker {:?}",
                self.queue.broker
            )));
        }

        let mut tags = HashSet::new();
        for device in &self.devices {
            let tag = device.tag();
            if !tags.insert(tag.clone()) {
                return Err(CryoSrvError::config(format!("duplicate device tag {tag:?}")));
            }
            if device.queryinterval == 0 {
                return Err(CryoSrvError::config(format!(
                    "{tag}: queryinterval must be > 0"
                )));
            }
            if !self.brokers.contains_key(&device.broker) {
                return Err(CryoSrvError::config(format!(
                    "{tag}: unknown broker {:?}",
                    device.broker
                )));
            }
            if !self.databases.contains_key(&device.database) {
                return Err(CryoSrvError::config(format!(
                    "{tag}: unknown database {:?}",
                    device.database
                )));
            }
        }

        for legacy in &self.legacy_topics {
            if !self.databases.contains_key(&legacy.database) {
                return Err(CryoSrvError::config(format!(
                    "legacy topic {}: unknown database {:?}",
                    legacy.topic, legacy.database
                )));
            }
        }

        Ok(())
    }
}
