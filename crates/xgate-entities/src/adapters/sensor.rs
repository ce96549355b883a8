//! Read-only sensors and button action sensors.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use xgate_devices::{AttrMap, AttrValue, Platform, ACTION_ATTR};

use crate::adapter::{listen, EntityAdapter, StateChange};
use crate::platform::PlatformEvent;

/// Event fired for every button action.
pub const CLICK_EVENT: &str = "xiaomi_aqara.click";

/// Generic sensor rendering one attribute as its state.
#[derive(Debug)]
pub struct Sensor {
    attr: String,
    listen: BTreeSet<String>,
    value: Option<AttrValue>,
}

impl Sensor {
    pub fn new(attr: &str) -> Self {
        Self {
            attr: attr.to_string(),
            listen: listen([attr]),
            value: None,
        }
    }

    pub fn value(&self) -> Option<&AttrValue> {
        self.value.as_ref()
    }

    fn device_class(&self) -> Option<&'static str> {
        match self.attr.as_str() {
            "temperature" => Some("temperature"),
            "humidity" => Some("humidity"),
            "battery" => Some("battery"),
            _ => None,
        }
    }
}

impl EntityAdapter for Sensor {
    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn attr(&self) -> &str {
        &self.attr
    }

    fn listen_attrs(&self) -> &BTreeSet<String> {
        &self.listen
    }

    fn set_state(&mut self, data: &AttrMap) -> StateChange {
        if let Some(value) = data.get(&self.attr) {
            self.value = Some(value.clone());
        }
        StateChange::none()
    }

    fn get_state(&self) -> AttrMap {
        AttrMap::from([(
            self.attr.clone(),
            self.value.clone().unwrap_or(AttrValue::Null),
        )])
    }

    fn state(&self) -> String {
        match &self.value {
            Some(value) if !value.is_null() => value.to_string(),
            _ => "unknown".to_string(),
        }
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(class) = self.device_class() {
            map.insert("device_class".into(), Value::from(class));
        }
        map
    }
}

/// Button action sensor.
///
/// Shows the last action (e.g. `button_1_single`) and fires a click event,
/// then returns to an empty state after the debounce window. Actions are
/// never restored.
#[derive(Debug)]
pub struct ActionSensor {
    listen: BTreeSet<String>,
    action: String,
}

impl Default for ActionSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionSensor {
    pub fn new() -> Self {
        Self {
            listen: listen([ACTION_ATTR]),
            action: String::new(),
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl EntityAdapter for ActionSensor {
    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn attr(&self) -> &str {
        ACTION_ATTR
    }

    fn listen_attrs(&self) -> &BTreeSet<String> {
        &self.listen
    }

    fn set_state(&mut self, data: &AttrMap) -> StateChange {
        let Some(action) = data.get(ACTION_ATTR).and_then(AttrValue::as_str) else {
            return StateChange::none();
        };
        self.action = action.to_string();
        StateChange {
            events: vec![PlatformEvent::new(CLICK_EVENT).with("click_type", action)],
            momentary: true,
        }
    }

    fn get_state(&self) -> AttrMap {
        AttrMap::new()
    }

    fn state(&self) -> String {
        self.action.clone()
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("device_class".into(), Value::from("action"));
        map.insert("icon".into(), Value::from("mdi:bell"));
        map
    }

    fn clear_momentary(&mut self) -> bool {
        !std::mem::take(&mut self.action).is_empty()
    }
}
