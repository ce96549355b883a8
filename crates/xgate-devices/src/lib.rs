//! Gateway device layer
//!
//! Translates between the raw wire messages of a multi-protocol home gateway
//! (ZigBee clusters, vendor resource ids, mesh properties and BLE events) and
//! a normalized attribute model.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `mqtt` | ✅ | MQTT transport via `rumqttc` |
//!
//! ## Architecture
//!
//! - **Converter**: codec for one attribute, bound to one wire address
//! - **Device**: identity, converters, attribute cache and listeners
//! - **Gateway**: device registry, inbound routing and outbound writes
//! - **Transport**: publish side of the broker connection
//!
//! Devices are resolved from the static model table in [`models`] and shared
//! as `Arc<Device>` with the entity layer.

pub mod attribute;
pub mod config;
pub mod converter;
pub mod device;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod transport;
pub mod wire;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use attribute::{attrs, AttrMap, AttrValue};
pub use config::{GatewayConfig, TopicConfig, UnknownDevicePolicy};
pub use converter::{
    Address, BinaryFormat, CodeMap, Codec, Converter, MiredRange, Platform, ProtocolDomain,
    ACTION_ATTR,
};
pub use device::{
    AvailabilityListener, Device, DeviceExtra, DeviceIdentity, DeviceKind, Listener, ListenerId,
};
pub use error::{Error, Result};
pub use gateway::{Gateway, InboundMessage};
pub use logging::init_logging;
pub use transport::{BufferedTransport, Transport};
pub use wire::{RawMessage, RawParam, WireMessage, WriteCommand};

#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;
