//! Platform collaborator.
//!
//! The home-automation platform is opaque to this crate: entities push their
//! rendered state, fire events and ask for the state saved before a restart.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use xgate_devices::AttrMap;

/// Rendered state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    pub attributes: Map<String, Value>,
    pub available: bool,
    /// Adapter state to hand back on restore.
    #[serde(skip)]
    pub saved: AttrMap,
}

impl EntityState {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Event fired on the platform bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformEvent {
    pub event_type: String,
    pub data: Map<String, Value>,
}

impl PlatformEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Capabilities the platform provides to entities.
pub trait PlatformHandle: Send + Sync {
    fn write_state(&self, state: EntityState);

    fn fire_event(&self, event: PlatformEvent);

    /// Adapter state saved for `entity_id` by an earlier run, if any.
    fn restore_state(&self, entity_id: &str) -> Option<AttrMap>;
}

/// In-memory platform recording everything it receives.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    states: Mutex<HashMap<String, EntityState>>,
    writes: Mutex<usize>,
    events: Mutex<Vec<PlatformEvent>>,
    saved: Mutex<HashMap<String, AttrMap>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest state written for an entity.
    pub fn state(&self, entity_id: &str) -> Option<EntityState> {
        self.states.lock().get(entity_id).cloned()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }

    pub fn events(&self) -> Vec<PlatformEvent> {
        self.events.lock().clone()
    }

    /// Pretend `saved` was persisted for `entity_id` before a restart.
    pub fn seed(&self, entity_id: &str, saved: AttrMap) {
        self.saved.lock().insert(entity_id.to_string(), saved);
    }
}

impl PlatformHandle for RecordingPlatform {
    fn write_state(&self, state: EntityState) {
        *self.writes.lock() += 1;
        self.saved
            .lock()
            .insert(state.entity_id.clone(), state.saved.clone());
        self.states.lock().insert(state.entity_id.clone(), state);
    }

    fn fire_event(&self, event: PlatformEvent) {
        tracing::debug!("Event {}: {:?}", event.event_type, event.data);
        self.events.lock().push(event);
    }

    fn restore_state(&self, entity_id: &str) -> Option<AttrMap> {
        self.saved.lock().get(entity_id).cloned()
    }
}
