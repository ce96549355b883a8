//! Gateway entity layer
//!
//! Subscribes platform entities to subsets of device attributes, renders
//! their state and turns platform commands back into attribute writes.
//!
//! ## Architecture
//!
//! - **EntityAdapter**: per-platform translation of attributes to state
//! - **Entity**: attach/detach lifecycle, restore, momentary clear, group wait
//! - **PlatformHandle**: the platform's state, event and restore services
//! - **PlatformRegistry**: factories per platform and add-entities slots
//!
//! ```no_run
//! use std::sync::Arc;
//! use xgate_devices::{BufferedTransport, Gateway, GatewayConfig, Platform};
//! use xgate_entities::{PlatformRegistry, RecordingPlatform};
//!
//! let config = GatewayConfig::load("gateway.toml")?;
//! let gateway = Gateway::new(config, Arc::new(BufferedTransport::new()))?;
//! let registry = PlatformRegistry::with_defaults(Arc::new(RecordingPlatform::new()));
//! registry.register_slot("entry", Platform::Sensor, |entities| {
//!     println!("{} new sensors", entities.len());
//! });
//! for device in gateway.devices() {
//!     registry.setup_device("entry", &gateway, &device);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod adapter;
pub mod adapters;
pub mod debounce;
pub mod entity;
pub mod error;
pub mod platform;
pub mod registry;

#[cfg(test)]
mod testing;

pub use adapter::{listen, EntityAdapter, StateChange};
pub use adapters::{
    ActionSensor, Climate, ColorMode, Cover, Light, LightKind, LightParams, Sensor, CLICK_EVENT,
};
pub use debounce::{Debouncer, UpdateSignal};
pub use entity::{downcast, entity_id_for, DynEntity, Entity, EntityRef};
pub use error::{EntityError, Result};
pub use platform::{EntityState, PlatformEvent, PlatformHandle, RecordingPlatform};
pub use registry::{AddEntities, EntityContext, EntityFactory, PlatformRegistry};
