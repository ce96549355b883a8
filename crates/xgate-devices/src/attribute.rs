//! Normalized attribute model.
//!
//! Every device, regardless of protocol, exposes its state as a map of named
//! attributes holding an [`AttrValue`]. Converters translate between these
//! values and wire values; entity adapters only ever see this model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered map of attribute name to value.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Boolean(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Truthiness in the loose sense devices use: non-zero numbers and
    /// non-empty strings are `true`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            Self::Integer(v) => Some(*v != 0),
            Self::Float(v) => Some(*v != 0.0),
            Self::String(v) => Some(!v.is_empty()),
            Self::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Boolean(_) => "boolean",
            Self::Null => "null",
        }
    }

    /// Convert a JSON value taken off the wire.
    ///
    /// Arrays and objects are kept as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            Value::String(s) => Self::String(s.clone()),
            Value::Array(_) | Value::Object(_) => Self::String(value.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Boolean(v) => Value::from(*v),
            Self::Integer(v) => Value::from(*v),
            Self::Float(v) => Value::from(*v),
            Self::String(v) => Value::from(v.as_str()),
            Self::Null => Value::Null,
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

/// Build an [`AttrMap`] from `(name, value)` pairs.
pub fn attrs<K, V, I>(pairs: I) -> AttrMap
where
    K: Into<String>,
    V: Into<AttrValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attr_value_conversions() {
        let int_val = AttrValue::Integer(42);
        assert_eq!(int_val.as_i64(), Some(42));
        assert_eq!(int_val.as_f64(), Some(42.0));
        assert_eq!(int_val.as_bool(), Some(true));

        let float_val = AttrValue::Float(22.5);
        assert_eq!(float_val.as_f64(), Some(22.5));
        assert_eq!(float_val.as_i64(), None);

        let string_val = AttrValue::from("heat");
        assert_eq!(string_val.as_str(), Some("heat"));
        assert_eq!(AttrValue::from("").as_bool(), Some(false));

        assert_eq!(AttrValue::Null.as_bool(), None);
    }

    #[test]
    fn test_json_conversion() {
        assert_eq!(AttrValue::from_json(&json!(2300)), AttrValue::Integer(2300));
        assert_eq!(AttrValue::from_json(&json!(23.5)), AttrValue::Float(23.5));
        assert_eq!(AttrValue::from_json(&json!(true)), AttrValue::Boolean(true));
        assert_eq!(AttrValue::from_json(&json!(null)), AttrValue::Null);
        assert_eq!(
            AttrValue::from_json(&json!([1, 2])),
            AttrValue::String("[1,2]".to_string())
        );

        assert_eq!(AttrValue::Float(2250.0).to_json(), json!(2250.0));
        assert_eq!(AttrValue::from("open").to_json(), json!("open"));
    }

    #[test]
    fn test_attrs_builder() {
        let map = attrs([("brightness", 128), ("color_temp", 300)]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["brightness"], AttrValue::Integer(128));
    }
}
