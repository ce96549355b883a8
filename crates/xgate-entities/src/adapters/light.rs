//! Lights: plain, ZigBee (with transitions) and mesh groups.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Map, Value};
use xgate_devices::{AttrMap, AttrValue, Codec, Device, DeviceKind, Platform};

use crate::adapter::{put, EntityAdapter, StateChange};
use crate::entity::Entity;
use crate::error::Result;

pub const BRIGHTNESS: &str = "brightness";
pub const COLOR_TEMP: &str = "color_temp";
pub const EFFECT: &str = "effect";
pub const TRANSITION: &str = "transition";

/// Color capability, in increasing order of richness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColorMode {
    OnOff,
    Brightness,
    ColorTemp,
}

impl ColorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnOff => "onoff",
            Self::Brightness => "brightness",
            Self::ColorTemp => "color_temp",
        }
    }
}

/// Light flavour, picked from the device kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Plain,
    /// Supports transitions; `default_transition` applies to every command
    /// that doesn't name one.
    Zigbee { default_transition: Option<f64> },
    /// Waits for a child to confirm after each command.
    Group,
}

/// Arguments of `turn_on` / `turn_off`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LightParams {
    pub brightness: Option<i64>,
    pub color_temp: Option<i64>,
    pub effect: Option<String>,
    /// Seconds.
    pub transition: Option<f64>,
}

#[derive(Debug)]
pub struct Light {
    attr: String,
    kind: LightKind,
    listen: BTreeSet<String>,
    childs: Vec<String>,
    color_mode: ColorMode,
    min_mireds: Option<u32>,
    max_mireds: Option<u32>,
    effect_list: Vec<String>,
    supports_transition: bool,

    is_on: Option<bool>,
    brightness: Option<i64>,
    color_temp: Option<i64>,
    effect: Option<String>,
}

impl Light {
    /// Light for `attr` of `device`, flavour chosen by the device kind.
    pub fn new(device: &Device, attr: &str) -> Self {
        let kind = match device.kind() {
            DeviceKind::Zigbee => LightKind::Zigbee {
                default_transition: device.extra().default_transition,
            },
            DeviceKind::Group => LightKind::Group,
            DeviceKind::Mesh | DeviceKind::Ble => LightKind::Plain,
        };
        Self::with_kind(device, attr, kind)
    }

    pub fn with_kind(device: &Device, attr: &str, kind: LightKind) -> Self {
        let mut light = Self {
            attr: attr.to_string(),
            kind,
            listen: BTreeSet::from([attr.to_string()]),
            childs: Vec::new(),
            color_mode: ColorMode::OnOff,
            min_mireds: None,
            max_mireds: None,
            effect_list: Vec::new(),
            supports_transition: false,
            is_on: None,
            brightness: None,
            color_temp: None,
            effect: None,
        };

        for conv in device.converters() {
            match (conv.attr(), conv.codec()) {
                (BRIGHTNESS, _) => {
                    light.listen.insert(BRIGHTNESS.to_string());
                    light.color_mode = light.color_mode.max(ColorMode::Brightness);
                }
                (COLOR_TEMP, codec) => {
                    light.listen.insert(COLOR_TEMP.to_string());
                    light.color_mode = ColorMode::ColorTemp;
                    if let Codec::ColorTemp(range) = codec {
                        light.min_mireds = Some(range.min);
                        light.max_mireds = Some(range.max);
                    }
                }
                (EFFECT, Codec::Map(map)) => {
                    light.listen.insert(EFFECT.to_string());
                    light.effect_list = map.names().map(str::to_string).collect();
                }
                (TRANSITION, _) => {
                    light.supports_transition = matches!(kind, LightKind::Zigbee { .. });
                }
                _ => {}
            }
        }

        if kind == LightKind::Group {
            light.childs = device.extra().childs.clone();
        }
        light
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn is_on(&self) -> Option<bool> {
        self.is_on
    }

    pub fn brightness(&self) -> Option<i64> {
        self.brightness
    }

    pub fn color_temp(&self) -> Option<i64> {
        self.color_temp
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    pub fn mireds(&self) -> Option<(u32, u32)> {
        self.min_mireds.zip(self.max_mireds)
    }

    pub fn effect_list(&self) -> &[String] {
        &self.effect_list
    }

    fn default_transition(&self) -> Option<f64> {
        match self.kind {
            LightKind::Zigbee { default_transition } => default_transition,
            _ => None,
        }
    }

    /// Attributes to write for `turn_on`.
    pub fn turn_on_request(&self, params: &LightParams) -> AttrMap {
        let transition = params.transition.or(self.default_transition());
        let mut request = AttrMap::new();

        if let Some(b) = params.brightness {
            request.insert(BRIGHTNESS.to_string(), AttrValue::Integer(b));
        }
        if let Some(ct) = params.color_temp {
            request.insert(COLOR_TEMP.to_string(), AttrValue::Integer(ct));
        }

        match transition {
            // with a transition only brightness, color_temp and transition go out
            Some(t) if self.supports_transition => {
                request.insert(TRANSITION.to_string(), AttrValue::Float(t));
            }
            _ => {
                if let Some(effect) = &params.effect {
                    request.insert(EFFECT.to_string(), AttrValue::from(effect.as_str()));
                }
            }
        }

        if request.is_empty() {
            request.insert(self.attr.clone(), AttrValue::Boolean(true));
        }
        request
    }

    /// Attributes to write for `turn_off`.
    pub fn turn_off_request(&self, params: &LightParams) -> AttrMap {
        let transition = params.transition.or(self.default_transition());
        match transition {
            Some(t) if self.supports_transition => AttrMap::from([
                (TRANSITION.to_string(), AttrValue::Float(t)),
                (BRIGHTNESS.to_string(), AttrValue::Integer(0)),
            ]),
            _ => AttrMap::from([(self.attr.clone(), AttrValue::Boolean(false))]),
        }
    }
}

impl EntityAdapter for Light {
    fn platform(&self) -> Platform {
        Platform::Light
    }

    fn attr(&self) -> &str {
        &self.attr
    }

    fn listen_attrs(&self) -> &BTreeSet<String> {
        &self.listen
    }

    fn set_state(&mut self, data: &AttrMap) -> StateChange {
        if let Some(on) = data.get(&self.attr).and_then(AttrValue::as_bool) {
            self.is_on = Some(on);
        }
        if let Some(b) = data.get(BRIGHTNESS).and_then(AttrValue::as_i64) {
            self.brightness = Some(b);
        }
        if let Some(ct) = data.get(COLOR_TEMP).and_then(AttrValue::as_i64) {
            self.color_temp = Some(ct);
        }
        if let Some(effect) = data.get(EFFECT).and_then(AttrValue::as_str) {
            self.effect = Some(effect.to_string());
        }
        StateChange::none()
    }

    fn get_state(&self) -> AttrMap {
        AttrMap::from([
            (self.attr.clone(), self.is_on.map_or(AttrValue::Null, AttrValue::from)),
            (BRIGHTNESS.to_string(), self.brightness.map_or(AttrValue::Null, AttrValue::from)),
            (COLOR_TEMP.to_string(), self.color_temp.map_or(AttrValue::Null, AttrValue::from)),
        ])
    }

    fn state(&self) -> String {
        match self.is_on {
            Some(true) => "on".to_string(),
            Some(false) => "off".to_string(),
            None => "unknown".to_string(),
        }
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("color_mode".into(), Value::from(self.color_mode.as_str()));
        map.insert(
            "supported_color_modes".into(),
            Value::from(vec![self.color_mode.as_str()]),
        );
        if self.color_mode >= ColorMode::Brightness {
            put(&mut map, BRIGHTNESS, self.brightness);
        }
        if self.color_mode == ColorMode::ColorTemp {
            put(&mut map, COLOR_TEMP, self.color_temp);
            put(&mut map, "min_mireds", self.min_mireds);
            put(&mut map, "max_mireds", self.max_mireds);
        }
        if !self.effect_list.is_empty() {
            put(&mut map, EFFECT, self.effect.clone());
            map.insert("effect_list".into(), Value::from(self.effect_list.clone()));
        }
        map
    }

    fn linked_devices(&self) -> Vec<String> {
        self.childs.clone()
    }
}

impl Entity<Light> {
    pub async fn turn_on(&self, params: LightParams) -> Result<()> {
        let (request, group) =
            self.inspect(|l| (l.turn_on_request(&params), l.kind == LightKind::Group));
        self.write(request).await?;
        if group {
            self.wait_for_update().await;
        }
        Ok(())
    }

    pub async fn turn_off(&self, params: LightParams) -> Result<()> {
        let (request, group) =
            self.inspect(|l| (l.turn_off_request(&params), l.kind == LightKind::Group));
        self.write(request).await?;
        if group {
            self.wait_for_update().await;
        }
        Ok(())
    }
}
