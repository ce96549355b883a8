//! Entity adapter trait.
//!
//! An adapter turns attribute updates into platform-visible state. It owns no
//! timers, locks or device handles; [`Entity`](crate::Entity) drives it.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use xgate_devices::{AttrMap, Platform};

use crate::platform::PlatformEvent;

/// Side effects requested by [`EntityAdapter::set_state`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateChange {
    /// Events to fire; the entity adds its `entity_id` to each.
    pub events: Vec<PlatformEvent>,
    /// Restart the momentary-clear timer.
    pub momentary: bool,
}

impl StateChange {
    pub fn none() -> Self {
        Self::default()
    }
}

pub trait EntityAdapter: Send + 'static {
    fn platform(&self) -> Platform;

    /// Attribute the entity is named after.
    fn attr(&self) -> &str;

    /// Attributes whose changes reach [`set_state`](Self::set_state).
    fn listen_attrs(&self) -> &BTreeSet<String>;

    /// Apply a subset of `listen_attrs`. Keys not present keep their value.
    fn set_state(&mut self, data: &AttrMap) -> StateChange;

    /// State worth restoring after a restart.
    fn get_state(&self) -> AttrMap;

    /// Platform state string.
    fn state(&self) -> String;

    fn attributes(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Reset momentary state once the debounce window elapses. Returns
    /// whether anything changed.
    fn clear_momentary(&mut self) -> bool {
        false
    }

    /// Devices whose updates are forwarded to this entity's device.
    fn linked_devices(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Build a `listen_attrs` set.
pub fn listen<I, S>(attrs: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    attrs.into_iter().map(Into::into).collect()
}

/// Copy an optional value into a JSON attribute map, `null` when unset.
pub(crate) fn put<T: Into<Value>>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    map.insert(key.to_string(), value.map_or(Value::Null, Into::into));
}
