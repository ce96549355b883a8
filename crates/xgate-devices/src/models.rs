//! Model table: which converters a device model speaks.
//!
//! Resolution is a static lookup from the model string reported by the
//! gateway. The converter order in each entry is the device's canonical write
//! order (e.g. a light's transition comes after brightness and color
//! temperature).

use crate::converter::{Address, BinaryFormat, CodeMap, Codec, Converter, MiredRange, Platform};
use crate::device::{Device, DeviceExtra, DeviceIdentity, DeviceKind};
use crate::error::{Error, Result};

/// One entry of the model table.
pub struct DeviceModel {
    /// Model strings sharing this definition.
    pub models: &'static [&'static str],
    /// Market name, used to name entities.
    pub name: &'static str,
    pub kind: DeviceKind,
    converters: fn() -> Vec<Converter>,
}

impl DeviceModel {
    pub fn converters(&self) -> Vec<Converter> {
        (self.converters)()
    }
}

impl std::fmt::Debug for DeviceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceModel")
            .field("models", &self.models)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

static MODELS: &[DeviceModel] = &[
    DeviceModel {
        models: &["lumi.sensor_86sw2", "lumi.remote.b286acn01"],
        name: "Aqara Double Wall Button",
        kind: DeviceKind::Zigbee,
        converters: double_wall_button,
    },
    DeviceModel {
        models: &["lumi.airrtc.agl001"],
        name: "Aqara Thermostat E1",
        kind: DeviceKind::Zigbee,
        converters: thermostat_e1,
    },
    DeviceModel {
        models: &["lumi.curtain.acn002"],
        name: "Aqara Roller Shade E1",
        kind: DeviceKind::Zigbee,
        converters: roller_shade_e1,
    },
    DeviceModel {
        models: &["lumi.light.acn014", "lumi.light.cwac02"],
        name: "Aqara Bulb T1",
        kind: DeviceKind::Zigbee,
        converters: zigbee_bulb,
    },
    DeviceModel {
        models: &["ikea.light.led1650r5", "ikea.light.led1649c5"],
        name: "IKEA Bulb",
        kind: DeviceKind::Mesh,
        converters: mesh_bulb,
    },
    DeviceModel {
        models: &["group.light"],
        name: "Light Group",
        kind: DeviceKind::Group,
        converters: light_group,
    },
    DeviceModel {
        models: &["LYWSDCGQ/01ZM"],
        name: "Xiaomi TH Sensor",
        kind: DeviceKind::Ble,
        converters: ble_th_sensor,
    },
];

/// Look up the table entry for a model string.
pub fn lookup(model: &str) -> Option<&'static DeviceModel> {
    MODELS.iter().find(|m| m.models.contains(&model))
}

/// All known models.
pub fn models() -> &'static [DeviceModel] {
    MODELS
}

/// Build a device for a known model.
///
/// The market name is used as the device name unless `extra` names it.
pub fn resolve(identity: DeviceIdentity, mut extra: DeviceExtra) -> Result<Device> {
    let model = lookup(&identity.model)
        .ok_or_else(|| Error::Config(format!("unsupported model: {}", identity.model)))?;
    if extra.name.is_none() {
        extra.name = Some(model.name.to_string());
    }
    Ok(Device::new(identity, model.kind, model.converters())?.with_extra(extra))
}

fn battery() -> Converter {
    Converter::new("battery", Address::resource("8.0.2001"), Codec::Raw)
        .with_platform(Platform::Sensor)
        .read_only()
}

fn button(attr: &str, resource: &str) -> Converter {
    Converter::new(
        attr,
        Address::resource(resource),
        Codec::Button {
            clicks: CodeMap::new([
                (1, "single"),
                (2, "double"),
                (3, "triple"),
                (16, "hold"),
                (17, "release"),
                (18, "shake"),
            ]),
        },
    )
}

fn double_wall_button() -> Vec<Converter> {
    vec![
        Converter::virtual_attr("action").with_platform(Platform::Sensor),
        button("button_1", "13.1.85"),
        button("button_2", "13.2.85"),
        button("button_both", "13.5.85"),
        battery(),
    ]
}

fn thermostat_e1() -> Vec<Converter> {
    vec![
        Converter::virtual_attr("climate").with_platform(Platform::Climate),
        Converter::new("power", Address::resource("4.21.85"), Codec::Bool),
        Converter::new(
            "hvac_mode",
            Address::resource("14.51.85"),
            Codec::map([(0, "heat"), (2, "auto")]),
        ),
        Converter::new("current_temp", Address::resource("0.1.85"), Codec::scaled(100.0, 2))
            .read_only(),
        Converter::new(
            "temperature",
            Address::resource("1.8.85"),
            Codec::bounded(100.0, 2, 5.0, 30.0),
        ),
        battery(),
    ]
}

fn roller_shade_e1() -> Vec<Converter> {
    vec![
        Converter::new(
            "motor",
            Address::resource("14.2.85"),
            Codec::map([(0, "close"), (1, "open"), (2, "stop")]),
        )
        .with_platform(Platform::Cover),
        Converter::new("position", Address::resource("1.1.85"), Codec::Raw),
        Converter::new(
            "run_state",
            Address::resource("14.4.85"),
            Codec::map([(0, "closing"), (1, "opening"), (2, "stop")]),
        )
        .read_only(),
        battery(),
    ]
}

fn zigbee_bulb() -> Vec<Converter> {
    vec![
        Converter::new("light", Address::cluster(0x0006, 0x0000), Codec::Bool)
            .with_platform(Platform::Light),
        Converter::new(
            "brightness",
            Address::cluster(0x0008, 0x0000),
            Codec::Brightness { max: 254.0 },
        ),
        Converter::new(
            "color_temp",
            Address::cluster(0x0300, 0x0007),
            Codec::ColorTemp(MiredRange::mireds(153, 370)),
        ),
        // seconds in the model, tenths of a second on the wire
        Converter::new(
            "transition",
            Address::cluster(0x0008, 0x0010),
            Codec::scaled(10.0, 1),
        ),
    ]
}

fn mesh_bulb() -> Vec<Converter> {
    vec![
        Converter::new("light", Address::property(2, 1), Codec::Bool)
            .with_platform(Platform::Light),
        Converter::new("brightness", Address::property(2, 2), Codec::Brightness { max: 100.0 }),
        Converter::new(
            "color_temp",
            Address::property(2, 3),
            Codec::ColorTemp(MiredRange::kelvin(2200, 4000)),
        ),
        Converter::new(
            "effect",
            Address::property(2, 4),
            Codec::map([(0, "Warm"), (1, "Reading"), (2, "Night")]),
        ),
    ]
}

fn light_group() -> Vec<Converter> {
    vec![
        Converter::new("light", Address::property(2, 1), Codec::Bool)
            .with_platform(Platform::Light),
        Converter::new("brightness", Address::property(2, 2), Codec::Brightness { max: 100.0 }),
        Converter::new(
            "color_temp",
            Address::property(2, 3),
            Codec::ColorTemp(MiredRange::kelvin(2700, 6500)),
        ),
    ]
}

fn ble_th_sensor() -> Vec<Converter> {
    vec![
        Converter::new(
            "temperature",
            Address::event(0x1004),
            Codec::Ble {
                format: BinaryFormat::Int16Le,
                divisor: 10.0,
            },
        )
        .with_platform(Platform::Sensor),
        Converter::new(
            "humidity",
            Address::event(0x1006),
            Codec::Ble {
                format: BinaryFormat::UInt16Le,
                divisor: 10.0,
            },
        )
        .with_platform(Platform::Sensor),
        Converter::new(
            "battery",
            Address::event(0x100a),
            Codec::Ble {
                format: BinaryFormat::UInt8,
                divisor: 1.0,
            },
        )
        .with_platform(Platform::Sensor),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_model_builds() {
        for model in models() {
            for name in model.models {
                let identity = DeviceIdentity::new(*name, format!("did.{}", name), "0x01");
                let device = resolve(identity, DeviceExtra::default())
                    .unwrap_or_else(|e| panic!("{}: {}", name, e));
                assert_eq!(device.kind(), model.kind);
                assert_eq!(device.extra().name.as_deref(), Some(model.name));
            }
        }
    }

    #[test]
    fn test_model_strings_unique() {
        let mut seen = HashSet::new();
        for model in models() {
            for name in model.models {
                assert!(seen.insert(*name), "{} listed twice", name);
            }
        }
    }

    #[test]
    fn test_unknown_model() {
        let identity = DeviceIdentity::new("lumi.unknown", "lumi.1", "0x1");
        assert!(matches!(
            resolve(identity, DeviceExtra::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_bulb_transition_is_last() {
        let attrs: Vec<_> = zigbee_bulb().iter().map(|c| c.attr().to_string()).collect();
        assert_eq!(attrs.last().map(String::as_str), Some("transition"));
    }
}
