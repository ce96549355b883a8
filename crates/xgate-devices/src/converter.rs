//! Attribute converters.
//!
//! A [`Converter`] describes how one named attribute maps to and from the wire
//! for one protocol family. Converters are immutable once a device's model has
//! been resolved; all per-converter derived data (mired bounds, lookup tables)
//! is computed at construction.
//!
//! ## Addressing
//!
//! ```text
//! Address::Resource("13.1.85")         vendor resource   {res_name, value}
//! Address::Cluster { 0x0006, 0x0000 } ZigBee cluster     {cluster, attr, value}
//! Address::Property { 2, 1 }           vendor mesh       {siid, piid, value}
//! Address::Event { 0x1004 }            BLE advertisement {eid, edata}
//! Address::Virtual                     derived attribute, never on the wire
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attribute::{AttrMap, AttrValue};
use crate::error::{Error, Result};

/// Attribute every button converter also reports.
pub const ACTION_ATTR: &str = "action";

/// Wire addressing of a converter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Address {
    /// Vendor resource identifier, e.g. `"13.1.85"`.
    Resource(String),
    /// ZigBee cluster and attribute id.
    Cluster { cluster: u16, attribute: u16 },
    /// Vendor mesh service and property id.
    Property { siid: u16, piid: u16 },
    /// BLE advertisement event id.
    Event { eid: u16 },
    /// Derived attribute with no wire representation.
    Virtual,
}

impl Address {
    pub fn resource(id: impl Into<String>) -> Self {
        Self::Resource(id.into())
    }

    pub fn cluster(cluster: u16, attribute: u16) -> Self {
        Self::Cluster { cluster, attribute }
    }

    pub fn property(siid: u16, piid: u16) -> Self {
        Self::Property { siid, piid }
    }

    pub fn event(eid: u16) -> Self {
        Self::Event { eid }
    }

    /// Protocol family this address belongs to.
    pub fn domain(&self) -> ProtocolDomain {
        match self {
            Self::Resource(_) => ProtocolDomain::Resource,
            Self::Cluster { .. } => ProtocolDomain::Zigbee,
            Self::Property { .. } => ProtocolDomain::Mesh,
            Self::Event { .. } => ProtocolDomain::Ble,
            Self::Virtual => ProtocolDomain::Virtual,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "{}", id),
            Self::Cluster { cluster, attribute } => {
                write!(f, "0x{:04x}/0x{:04x}", cluster, attribute)
            }
            Self::Property { siid, piid } => write!(f, "{}.{}", siid, piid),
            Self::Event { eid } => write!(f, "eid {}", eid),
            Self::Virtual => write!(f, "virtual"),
        }
    }
}

/// Protocol family of a converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolDomain {
    Resource,
    Zigbee,
    Mesh,
    Ble,
    Virtual,
}

/// Platform an attribute is exposed on as an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Light,
    Cover,
    Climate,
    Sensor,
    BinarySensor,
    Switch,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Cover => "cover",
            Self::Climate => "climate",
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
            Self::Switch => "switch",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, bidirectional code ↔ name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeMap {
    entries: Vec<(i64, String)>,
}

impl CodeMap {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(c, n)| (c, n.into())).collect(),
        }
    }

    pub fn name(&self, code: i64) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, n)| n.as_str())
    }

    pub fn code(&self, name: &str) -> Option<i64> {
        self.entries.iter().find(|(_, n)| n == name).map(|(c, _)| *c)
    }

    /// Names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, n)| n.as_str())
    }
}

/// Color temperature bounds, always held in mireds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiredRange {
    pub min: u32,
    pub max: u32,
    /// Whether the wire carries kelvin rather than mireds.
    pub kelvin_on_wire: bool,
}

impl MiredRange {
    /// Bounds declared in mireds; the wire carries mireds.
    pub fn mireds(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            kelvin_on_wire: false,
        }
    }

    /// Bounds declared in kelvin; the wire carries kelvin.
    ///
    /// The coldest kelvin value gives the lowest mired bound.
    pub fn kelvin(min_kelvin: u32, max_kelvin: u32) -> Self {
        Self {
            min: kelvin_to_mireds(max_kelvin),
            max: kelvin_to_mireds(min_kelvin),
            kelvin_on_wire: true,
        }
    }

    pub fn clamp(&self, mireds: i64) -> i64 {
        mireds.clamp(self.min as i64, self.max as i64)
    }
}

/// `mireds = 1,000,000 / kelvin`, truncated like the platform does.
pub fn kelvin_to_mireds(kelvin: u32) -> u32 {
    if kelvin == 0 {
        return 0;
    }
    1_000_000 / kelvin
}

/// Binary layouts found in BLE advertisement fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    UInt8,
    Int16Le,
    UInt16Le,
    Int32Le,
}

impl BinaryFormat {
    fn width(&self) -> usize {
        match self {
            Self::UInt8 => 1,
            Self::Int16Le | Self::UInt16Le => 2,
            Self::Int32Le => 4,
        }
    }

    /// Parse the leading bytes of `data`.
    pub fn parse(&self, data: &[u8]) -> Option<i64> {
        if data.len() < self.width() {
            return None;
        }
        let value = match self {
            Self::UInt8 => data[0] as i64,
            Self::Int16Le => i16::from_le_bytes([data[0], data[1]]) as i64,
            Self::UInt16Le => u16::from_le_bytes([data[0], data[1]]) as i64,
            Self::Int32Le => i32::from_le_bytes([data[0], data[1], data[2], data[3]]) as i64,
        };
        Some(value)
    }
}

/// Value transform applied by a converter.
#[derive(Debug, Clone, PartialEq)]
pub enum Codec {
    /// Value passes through unchanged.
    Raw,
    /// Numeric 0/1 on the wire, boolean in the model.
    Bool,
    /// `model = wire / divisor`, rounded to `precision` decimals.
    Scaled {
        divisor: f64,
        precision: u32,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Lookup table.
    Map(CodeMap),
    /// Click code of one button; also reports `action = "<attr>_<click>"`.
    Button { clicks: CodeMap },
    /// Wire range `0..=max` exposed as `0..=255`.
    Brightness { max: f64 },
    /// Color temperature exposed in mireds.
    ColorTemp(MiredRange),
    /// Integer carried as a hex fragment in a BLE advertisement.
    Ble { format: BinaryFormat, divisor: f64 },
}

impl Codec {
    pub fn scaled(divisor: f64, precision: u32) -> Self {
        Self::Scaled {
            divisor,
            precision,
            min: None,
            max: None,
        }
    }

    pub fn bounded(divisor: f64, precision: u32, min: f64, max: f64) -> Self {
        Self::Scaled {
            divisor,
            precision,
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn map<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        Self::Map(CodeMap::new(entries))
    }

    /// Whether this transform can produce a wire value at all.
    fn encodes(&self) -> bool {
        !matches!(self, Self::Button { .. } | Self::Ble { .. })
    }
}

/// One attribute's wire mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Converter {
    attr: String,
    address: Address,
    codec: Codec,
    platform: Option<Platform>,
    writable: bool,
}

impl Converter {
    pub fn new(attr: impl Into<String>, address: Address, codec: Codec) -> Self {
        let writable = codec.encodes() && address != Address::Virtual;
        Self {
            attr: attr.into(),
            address,
            codec,
            platform: None,
            writable,
        }
    }

    /// Derived attribute, usually the anchor an entity is created for.
    pub fn virtual_attr(attr: impl Into<String>) -> Self {
        Self::new(attr, Address::Virtual, Codec::Raw)
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    pub fn domain(&self) -> ProtocolDomain {
        self.address.domain()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Attribute names this converter can produce.
    pub fn emits(&self) -> Vec<&str> {
        match self.codec {
            Codec::Button { .. } => vec![self.attr.as_str(), ACTION_ATTR],
            _ => vec![self.attr.as_str()],
        }
    }

    /// Decode one wire value into `out`.
    ///
    /// On error nothing is written to `out`.
    pub fn decode(&self, raw: &Value, out: &mut AttrMap) -> Result<()> {
        let value = match &self.codec {
            Codec::Raw => AttrValue::from_json(raw),
            Codec::Bool => AttrValue::Boolean(self.raw_bool(raw)?),
            Codec::Scaled { divisor, precision, .. } => {
                AttrValue::Float(round_to(self.raw_f64(raw)? / divisor, *precision))
            }
            Codec::Map(map) => {
                let code = self.raw_i64(raw)?;
                let name = map
                    .name(code)
                    .ok_or_else(|| Error::unknown_code(&self.attr, code))?;
                AttrValue::from(name)
            }
            Codec::Button { clicks } => {
                let code = self.raw_i64(raw)?;
                let click = clicks
                    .name(code)
                    .ok_or_else(|| Error::unknown_code(&self.attr, code))?;
                out.insert(self.attr.clone(), AttrValue::Integer(code));
                out.insert(
                    ACTION_ATTR.to_string(),
                    AttrValue::String(format!("{}_{}", self.attr, click)),
                );
                return Ok(());
            }
            Codec::Brightness { max } => {
                let wire = self.raw_f64(raw)?;
                AttrValue::Integer((wire / max * 255.0).round().clamp(0.0, 255.0) as i64)
            }
            Codec::ColorTemp(range) => {
                let wire = self.raw_i64(raw)?;
                if range.kelvin_on_wire {
                    if wire <= 0 {
                        return Err(self.invalid(raw));
                    }
                    AttrValue::Integer((1_000_000.0 / wire as f64).round() as i64)
                } else {
                    AttrValue::Integer(wire)
                }
            }
            Codec::Ble { format, divisor } => {
                let wire = match raw {
                    Value::String(fragment) => {
                        let bytes = hex::decode(fragment).map_err(|_| self.invalid(raw))?;
                        format.parse(&bytes).ok_or_else(|| self.invalid(raw))?
                    }
                    _ => self.raw_i64(raw)?,
                };
                let scaled = wire as f64 / divisor;
                if *divisor == 1.0 {
                    AttrValue::Integer(wire)
                } else {
                    AttrValue::Float(round_to(scaled, 2))
                }
            }
        };
        out.insert(self.attr.clone(), value);
        Ok(())
    }

    /// Encode a model value into its wire value.
    pub fn encode(&self, value: &AttrValue) -> Result<Value> {
        if !self.writable {
            return Err(Error::rejected(&self.attr, "attribute is read-only"));
        }
        match &self.codec {
            Codec::Raw => Ok(value.to_json()),
            Codec::Bool => {
                let on = value
                    .as_bool()
                    .ok_or_else(|| self.reject_type(value, "boolean"))?;
                Ok(Value::from(i64::from(on)))
            }
            Codec::Scaled { divisor, min, max, .. } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| self.reject_type(value, "number"))?;
                check_bounds(&self.attr, v, *min, *max)?;
                Ok(Value::from((v * divisor).round()))
            }
            Codec::Map(map) => {
                let code = match value {
                    AttrValue::String(name) => map.code(name),
                    AttrValue::Integer(code) => map.name(*code).map(|_| *code),
                    _ => None,
                };
                code.map(Value::from).ok_or_else(|| {
                    Error::rejected(&self.attr, format!("no code for value '{}'", value))
                })
            }
            Codec::Brightness { max } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| self.reject_type(value, "number"))?;
                check_bounds(&self.attr, v, Some(0.0), Some(255.0))?;
                Ok(Value::from((v / 255.0 * max).round() as i64))
            }
            Codec::ColorTemp(range) => {
                let mireds = value
                    .as_f64()
                    .ok_or_else(|| self.reject_type(value, "number"))?
                    .round() as i64;
                let mireds = range.clamp(mireds);
                if range.kelvin_on_wire {
                    Ok(Value::from((1_000_000.0 / mireds as f64).round() as i64))
                } else {
                    Ok(Value::from(mireds))
                }
            }
            Codec::Button { .. } | Codec::Ble { .. } => {
                Err(Error::rejected(&self.attr, "attribute is read-only"))
            }
        }
    }

    fn raw_i64(&self, raw: &Value) -> Result<i64> {
        let value = match raw {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        value.ok_or_else(|| self.invalid(raw))
    }

    fn raw_f64(&self, raw: &Value) -> Result<f64> {
        let value = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        value.ok_or_else(|| self.invalid(raw))
    }

    fn raw_bool(&self, raw: &Value) -> Result<bool> {
        match raw {
            Value::Bool(b) => Ok(*b),
            _ => self.raw_i64(raw).map(|v| v != 0),
        }
    }

    fn invalid(&self, raw: &Value) -> Error {
        Error::InvalidPayload(format!("'{}' cannot decode {}", self.attr, raw))
    }

    fn reject_type(&self, value: &AttrValue, expected: &str) -> Error {
        Error::rejected(
            &self.attr,
            format!("expected {}, got {}", expected, value.type_name()),
        )
    }
}

fn check_bounds(attr: &str, v: f64, min: Option<f64>, max: Option<f64>) -> Result<()> {
    if let Some(min) = min {
        if v < min {
            return Err(Error::rejected(attr, format!("value {} below min {}", v, min)));
        }
    }
    if let Some(max) = max {
        if v > max {
            return Err(Error::rejected(attr, format!("value {} above max {}", v, max)));
        }
    }
    Ok(())
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}
