//! Gateway configuration.
//!
//! Loaded from TOML, then overridden from the environment:
//!
//! ```toml
//! host = "192.168.1.10"
//! unknown_devices = "auto_register"
//! action_debounce_ms = 200
//!
//! [[devices]]
//! did = "lumi.112233aabbcc"
//! model = "lumi.light.acn014"
//! mac = "0x0000112233aabbcc"
//! default_transition = 0.5
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceExtra, DeviceIdentity, DeviceKind};
use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    pub const HOST: &str = "127.0.0.1";
    pub const PORT: u16 = 1883;
    pub const CLIENT_ID: &str = "xgate";
    /// Debounce window of momentary attributes.
    pub const ACTION_DEBOUNCE_MS: u64 = 200;
    /// How long group commands wait for a child to confirm.
    pub const GROUP_WAIT_SECS: u64 = 10;
    pub const ZIGBEE_COMMAND_TOPIC: &str = "zigbee/recv";
    pub const MESH_COMMAND_TOPIC: &str = "miio/recv";
    pub const INBOUND_TOPICS: &[&str] = &["zigbee/send", "miio/report"];
}

/// Environment variable names.
pub mod env_vars {
    pub const HOST: &str = "XGATE_HOST";
    pub const PORT: &str = "XGATE_PORT";
    pub const UNKNOWN_DEVICES: &str = "XGATE_UNKNOWN_DEVICES";
    pub const ACTION_DEBOUNCE_MS: &str = "XGATE_ACTION_DEBOUNCE_MS";
    pub const GROUP_WAIT_SECS: &str = "XGATE_GROUP_WAIT_SECS";
    pub const LOG_JSON: &str = "XGATE_LOG_JSON";

    pub(crate) fn get<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.parse().ok())
    }
}

/// What to do with traffic from an identity missing from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownDevicePolicy {
    /// Log and discard the message.
    #[default]
    Drop,
    /// Register a placeholder device with no converters.
    AutoRegister,
}

impl std::str::FromStr for UnknownDevicePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "drop" => Ok(Self::Drop),
            "auto_register" => Ok(Self::AutoRegister),
            other => Err(Error::Config(format!("unknown device policy: {}", other))),
        }
    }
}

/// MQTT topics used by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Topics carrying device reports.
    #[serde(default = "default_inbound")]
    pub inbound: Vec<String>,
    /// Command topic for ZigBee devices.
    #[serde(default = "default_zigbee_topic")]
    pub zigbee: String,
    /// Command topic for mesh devices and groups.
    #[serde(default = "default_mesh_topic")]
    pub mesh: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            inbound: default_inbound(),
            zigbee: default_zigbee_topic(),
            mesh: default_mesh_topic(),
        }
    }
}

impl TopicConfig {
    /// Command topic for a device kind; BLE devices accept no commands.
    pub fn command_topic(&self, kind: DeviceKind) -> Option<&str> {
        match kind {
            DeviceKind::Zigbee => Some(self.zigbee.as_str()),
            DeviceKind::Mesh | DeviceKind::Group => Some(self.mesh.as_str()),
            DeviceKind::Ble => None,
        }
    }

    pub fn is_inbound(&self, topic: &str) -> bool {
        self.inbound.iter().any(|t| t == topic)
    }
}

/// A device declared up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub did: String,
    pub model: String,
    pub mac: String,
    #[serde(default)]
    pub nwk: Option<String>,
    /// Whether the device starts out available.
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(flatten)]
    pub extra: DeviceExtra,
}

impl DeviceEntry {
    pub fn identity(&self) -> DeviceIdentity {
        let identity = DeviceIdentity::new(&self.model, &self.did, &self.mac);
        match &self.nwk {
            Some(nwk) => identity.with_nwk(nwk),
            None => identity,
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Broker host of the gateway.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub unknown_devices: UnknownDevicePolicy,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default = "default_action_debounce_ms")]
    pub action_debounce_ms: u64,
    #[serde(default = "default_group_wait_secs")]
    pub group_wait_secs: u64,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            unknown_devices: UnknownDevicePolicy::default(),
            topics: TopicConfig::default(),
            action_debounce_ms: default_action_debounce_ms(),
            group_wait_secs: default_group_wait_secs(),
            devices: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading gateway config {}", path.display()))?;
        let mut config = Self::from_toml_str(&text)
            .with_context(|| format!("parsing gateway config {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `XGATE_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var(env_vars::HOST) {
            self.host = host;
        }
        if let Some(port) = env_vars::get(env_vars::PORT) {
            self.port = port;
        }
        if let Some(policy) = env_vars::get(env_vars::UNKNOWN_DEVICES) {
            self.unknown_devices = policy;
        }
        if let Some(ms) = env_vars::get(env_vars::ACTION_DEBOUNCE_MS) {
            self.action_debounce_ms = ms;
        }
        if let Some(secs) = env_vars::get(env_vars::GROUP_WAIT_SECS) {
            self.group_wait_secs = secs;
        }
    }

    pub fn action_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.action_debounce_ms)
    }

    pub fn group_wait(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.group_wait_secs)
    }
}

fn default_host() -> String {
    defaults::HOST.to_string()
}
fn default_port() -> u16 {
    defaults::PORT
}
fn default_client_id() -> String {
    defaults::CLIENT_ID.to_string()
}
fn default_action_debounce_ms() -> u64 {
    defaults::ACTION_DEBOUNCE_MS
}
fn default_group_wait_secs() -> u64 {
    defaults::GROUP_WAIT_SECS
}
fn default_inbound() -> Vec<String> {
    defaults::INBOUND_TOPICS.iter().map(|t| t.to_string()).collect()
}
fn default_zigbee_topic() -> String {
    defaults::ZIGBEE_COMMAND_TOPIC.to_string()
}
fn default_mesh_topic() -> String {
    defaults::MESH_COMMAND_TOPIC.to_string()
}
fn default_true() -> bool {
    true
}
