//! Gateway: device registry and message routing.
//!
//! Every inbound message goes through the registry; nothing addresses a
//! device directly. Outbound writes are encoded by the device and handed to
//! the transport while the device's write lock is held, so two writes for the
//! same device are published in call order.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::attribute::AttrMap;
use crate::config::{GatewayConfig, UnknownDevicePolicy};
use crate::device::{Device, DeviceIdentity, DeviceKind};
use crate::error::{Error, Result};
use crate::models;
use crate::transport::Transport;
use crate::wire::{InboundEnvelope, RawMessage, RawParam};

/// Model string given to auto-registered devices.
pub const PLACEHOLDER_MODEL: &str = "unknown";

/// Inbound message as delivered by the transport.
pub type InboundMessage = (String, Vec<u8>);

/// Handle to one gateway connection. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    /// did -> device
    devices: DashMap<String, Arc<Device>>,
    /// mac -> did
    aliases: DashMap<String, String>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("host", &self.inner.config.host)
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}

impl Gateway {
    /// Create a gateway and register the devices declared in `config`.
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let gateway = Self {
            inner: Arc::new(GatewayInner {
                config,
                transport,
                devices: DashMap::new(),
                aliases: DashMap::new(),
            }),
        };

        for entry in gateway.inner.config.devices.clone() {
            let device = models::resolve(entry.identity(), entry.extra.clone())?;
            let device = gateway.add_device(device)?;
            device.set_available(entry.available);
        }

        tracing::info!(
            "Gateway {} ready with {} devices",
            gateway.inner.config.host,
            gateway.inner.devices.len()
        );
        Ok(gateway)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Register a device under its did and mac.
    pub fn add_device(&self, device: Device) -> Result<Arc<Device>> {
        let did = device.did().to_string();
        if self.inner.devices.contains_key(&did) || self.inner.aliases.contains_key(device.mac()) {
            return Err(Error::Config(format!("device already registered: {}", did)));
        }

        let device = Arc::new(device);
        if !device.mac().is_empty() && device.mac() != did {
            self.inner.aliases.insert(device.mac().to_string(), did.clone());
        }
        self.inner.devices.insert(did.clone(), device.clone());

        tracing::info!("Registered device {} ({})", did, device.model());
        Ok(device)
    }

    /// Remove a device by did or mac.
    ///
    /// The removed device is marked unavailable, so its entities publish that.
    pub fn remove_device(&self, identity: &str) -> Option<Arc<Device>> {
        let did = self.resolve_did(identity)?;
        let (_, device) = self.inner.devices.remove(&did)?;
        self.inner.aliases.remove(device.mac());
        device.set_available(false);
        tracing::info!("Removed device {}", did);
        Some(device)
    }

    /// Look up a device by did or mac.
    pub fn device(&self, identity: &str) -> Option<Arc<Device>> {
        let did = self.resolve_did(identity)?;
        self.inner.devices.get(&did).map(|d| d.value().clone())
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner.devices.iter().map(|d| d.value().clone()).collect()
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.len()
    }

    fn resolve_did(&self, identity: &str) -> Option<String> {
        if self.inner.devices.contains_key(identity) {
            return Some(identity.to_string());
        }
        self.inner.aliases.get(identity).map(|did| did.value().clone())
    }

    /// Decode a message for `identity` and dispatch its changes.
    ///
    /// Unknown identities follow the configured [`UnknownDevicePolicy`].
    pub fn route_inbound(&self, identity: &str, raw: &RawMessage) -> Result<AttrMap> {
        let device = match self.device(identity) {
            Some(device) => device,
            None => match self.inner.config.unknown_devices {
                UnknownDevicePolicy::Drop => {
                    return Err(Error::UnknownDevice(identity.to_string()));
                }
                UnknownDevicePolicy::AutoRegister => self.register_placeholder(identity, raw)?,
            },
        };
        Ok(device.decode(raw))
    }

    fn register_placeholder(&self, identity: &str, raw: &RawMessage) -> Result<Arc<Device>> {
        let kind = match raw.params.first() {
            Some(RawParam::Event { .. }) => DeviceKind::Ble,
            Some(RawParam::Property { .. }) => DeviceKind::Mesh,
            _ => DeviceKind::Zigbee,
        };
        tracing::warn!("Auto-registering unknown {} device {}", kind, identity);
        let identity = DeviceIdentity::new(PLACEHOLDER_MODEL, identity, identity);
        let device = self.add_device(Device::new(identity, kind, Vec::new())?)?;
        device.set_available(true);
        Ok(device)
    }

    /// Encode a write for `device` and publish it.
    ///
    /// A rejected encode publishes nothing. Publish failures are returned as
    /// [`Error::Publish`] without retrying.
    pub async fn route_outbound(&self, device: &Device, attrs: &AttrMap) -> Result<()> {
        let _ordered = device.write_lock().lock().await;

        let command = device.write(attrs)?;
        let topic = self
            .inner
            .config
            .topics
            .command_topic(device.kind())
            .ok_or_else(|| Error::rejected(device.did(), "device accepts no commands"))?;

        tracing::debug!("{} -> {}: {:?}", device.did(), topic, command.params);

        self.inner
            .transport
            .publish(topic, &command.to_json(), false)
            .await
            .map_err(|e| match e {
                Error::Publish(_) => e,
                other => Error::Publish(other.to_string()),
            })
    }

    /// Handle one message from the transport.
    ///
    /// Messages on topics that aren't inbound report topics are ignored.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.inner.config.topics.is_inbound(topic) {
            tracing::trace!("Ignoring message on {}", topic);
            return Ok(());
        }

        let envelope: InboundEnvelope = serde_json::from_slice(payload)?;
        match envelope.cmd.as_str() {
            "report" | "read_rsp" | "write_rsp" => {
                let did = envelope.did.clone();
                let raw = envelope.into_message();
                self.route_inbound(&did, &raw).map(|_| ())
            }
            other => {
                tracing::trace!("Ignoring '{}' from {}", other, envelope.did);
                Ok(())
            }
        }
    }

    /// Process inbound messages one at a time until the stream closes.
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some((topic, payload)) = inbound.recv().await {
            if let Err(e) = self.handle_message(&topic, &payload) {
                tracing::warn!("Dropped message on {}: {}", topic, e);
            }
        }
        tracing::info!("Inbound stream for {} closed", self.inner.config.host);
    }
}
