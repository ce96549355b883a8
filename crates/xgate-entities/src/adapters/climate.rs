//! Thermostats.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use xgate_devices::{AttrMap, AttrValue, Codec, Device, Platform};

use crate::adapter::{listen, put, EntityAdapter, StateChange};
use crate::entity::Entity;
use crate::error::{EntityError, Result};

pub const POWER: &str = "power";
pub const HVAC_MODE: &str = "hvac_mode";
pub const CURRENT_TEMP: &str = "current_temp";
pub const TEMPERATURE: &str = "temperature";

const OFF: &str = "off";
const TARGET_TEMP_STEP: f64 = 0.5;
const SUPPORT_TARGET_TEMPERATURE: i64 = 1;

/// Aqara Thermostat E1 (`lumi.airrtc.agl001`).
///
/// Power and mode are separate device attributes: the platform state is `off`
/// while power is off, otherwise the device mode once both are known.
#[derive(Debug)]
pub struct Climate {
    attr: String,
    listen: BTreeSet<String>,
    hvac_modes: Vec<String>,
    min_temp: f64,
    max_temp: f64,

    power: Option<bool>,
    hvac_mode: Option<String>,
    current_temp: Option<f64>,
    target_temp: Option<f64>,
}

impl Climate {
    /// Modes and temperature bounds come from the device's converters.
    pub fn new(device: &Device, attr: &str) -> Self {
        let mut hvac_modes = vec![OFF.to_string()];
        if let Some(Codec::Map(map)) = device.converter(HVAC_MODE).map(|c| c.codec()) {
            hvac_modes.extend(map.names().map(str::to_string));
        }

        let (min_temp, max_temp) = match device.converter(TEMPERATURE).map(|c| c.codec()) {
            Some(Codec::Scaled { min, max, .. }) => (min.unwrap_or(5.0), max.unwrap_or(30.0)),
            _ => (5.0, 30.0),
        };

        Self {
            attr: attr.to_string(),
            listen: listen([POWER, HVAC_MODE, CURRENT_TEMP, TEMPERATURE]),
            hvac_modes,
            min_temp,
            max_temp,
            power: None,
            hvac_mode: None,
            current_temp: None,
            target_temp: None,
        }
    }

    pub fn hvac_modes(&self) -> &[String] {
        &self.hvac_modes
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.target_temp
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.current_temp
    }

    /// Attributes to write for a mode change.
    pub fn hvac_mode_request(&self, mode: &str) -> Result<AttrMap> {
        if mode == OFF {
            return Ok(AttrMap::from([(POWER.to_string(), AttrValue::Boolean(false))]));
        }
        if !self.hvac_modes.iter().any(|m| m == mode) {
            return Err(EntityError::InvalidCommand(format!(
                "unsupported hvac mode '{}'",
                mode
            )));
        }
        Ok(AttrMap::from([
            (POWER.to_string(), AttrValue::Boolean(true)),
            (HVAC_MODE.to_string(), AttrValue::from(mode)),
        ]))
    }
}

impl EntityAdapter for Climate {
    fn platform(&self) -> Platform {
        Platform::Climate
    }

    fn attr(&self) -> &str {
        &self.attr
    }

    fn listen_attrs(&self) -> &BTreeSet<String> {
        &self.listen
    }

    fn set_state(&mut self, data: &AttrMap) -> StateChange {
        if let Some(power) = data.get(POWER).and_then(AttrValue::as_bool) {
            self.power = Some(power);
        }
        if let Some(mode) = data.get(HVAC_MODE).and_then(AttrValue::as_str) {
            self.hvac_mode = Some(mode.to_string());
        }
        if let Some(t) = data.get(CURRENT_TEMP).and_then(AttrValue::as_f64) {
            self.current_temp = Some(t);
        }
        if let Some(t) = data.get(TEMPERATURE).and_then(AttrValue::as_f64) {
            self.target_temp = Some(t);
        }
        StateChange::none()
    }

    fn get_state(&self) -> AttrMap {
        AttrMap::from([
            (POWER.to_string(), self.power.map_or(AttrValue::Null, AttrValue::from)),
            (
                HVAC_MODE.to_string(),
                self.hvac_mode.clone().map_or(AttrValue::Null, AttrValue::from),
            ),
            (
                TEMPERATURE.to_string(),
                self.target_temp.map_or(AttrValue::Null, AttrValue::from),
            ),
        ])
    }

    fn state(&self) -> String {
        match (self.power, &self.hvac_mode) {
            (Some(false), _) => OFF.to_string(),
            (Some(true), Some(mode)) => mode.clone(),
            _ => "unknown".to_string(),
        }
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("hvac_modes".into(), Value::from(self.hvac_modes.clone()));
        map.insert("min_temp".into(), Value::from(self.min_temp));
        map.insert("max_temp".into(), Value::from(self.max_temp));
        map.insert("target_temp_step".into(), Value::from(TARGET_TEMP_STEP));
        put(&mut map, "current_temperature", self.current_temp);
        put(&mut map, "temperature", self.target_temp);
        map.insert(
            "supported_features".into(),
            Value::from(SUPPORT_TARGET_TEMPERATURE),
        );
        map
    }
}

impl Entity<Climate> {
    pub async fn set_hvac_mode(&self, mode: &str) -> Result<()> {
        let request = self.inspect(|c| c.hvac_mode_request(mode))?;
        self.write(request).await
    }

    pub async fn set_temperature(&self, temperature: f64) -> Result<()> {
        self.write(AttrMap::from([(TEMPERATURE.to_string(), AttrValue::Float(temperature))]))
            .await
    }
}
