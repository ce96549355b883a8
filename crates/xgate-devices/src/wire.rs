//! Wire message shapes exchanged with the gateway.
//!
//! Inbound reports carry a list of params whose keys depend on the protocol
//! family; outbound writes use one command envelope for every family.
//!
//! ```json
//! {"cmd": "report", "did": "lumi.112233aabbcc", "params": [{"res_name": "13.1.85", "value": 1}]}
//! {"cmd": "write",  "did": "lumi.112233aabbcc", "params": [{"res_name": "1.8.85", "value": 2250.0}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::converter::Address;

/// One addressed value in a wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawParam {
    Resource { res_name: String, value: Value },
    Cluster { cluster: u16, attr: u16, value: Value },
    Property { siid: u16, piid: u16, value: Value },
    Event { eid: u16, edata: Value },
}

impl RawParam {
    /// Build the param carrying `value` at `address`.
    ///
    /// Returns `None` for virtual addresses, which never reach the wire.
    pub fn new(address: &Address, value: Value) -> Option<Self> {
        let param = match address {
            Address::Resource(id) => Self::Resource {
                res_name: id.clone(),
                value,
            },
            Address::Cluster { cluster, attribute } => Self::Cluster {
                cluster: *cluster,
                attr: *attribute,
                value,
            },
            Address::Property { siid, piid } => Self::Property {
                siid: *siid,
                piid: *piid,
                value,
            },
            Address::Event { eid } => Self::Event {
                eid: *eid,
                edata: value,
            },
            Address::Virtual => return None,
        };
        Some(param)
    }

    pub fn resource(id: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Resource {
            res_name: id.into(),
            value: value.into(),
        }
    }

    pub fn address(&self) -> Address {
        match self {
            Self::Resource { res_name, .. } => Address::Resource(res_name.clone()),
            Self::Cluster { cluster, attr, .. } => Address::cluster(*cluster, *attr),
            Self::Property { siid, piid, .. } => Address::property(*siid, *piid),
            Self::Event { eid, .. } => Address::event(*eid),
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::Resource { value, .. }
            | Self::Cluster { value, .. }
            | Self::Property { value, .. } => value,
            Self::Event { edata, .. } => edata,
        }
    }
}

/// Params reported by one device in one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub params: Vec<RawParam>,
}

impl RawMessage {
    pub fn new(params: Vec<RawParam>) -> Self {
        Self { params }
    }

    /// Convenience constructor for vendor resource reports.
    pub fn resources<I, S, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(id, value)| RawParam::resource(id, value))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Envelope the gateway publishes for device reports.
///
/// Params stay as plain JSON until [`InboundEnvelope::into_message`], so one
/// malformed entry costs only itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub cmd: String,
    pub did: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl InboundEnvelope {
    /// Parse the params, dropping entries that match no param shape.
    pub fn into_message(self) -> RawMessage {
        let did = self.did;
        let params = self
            .params
            .into_iter()
            .filter_map(|param| match RawParam::deserialize(&param) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::warn!("{}: malformed param {}, dropped: {}", did, param, e);
                    None
                }
            })
            .collect();
        RawMessage::new(params)
    }
}

/// Write command for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteCommand {
    pub cmd: String,
    pub did: String,
    pub params: Vec<RawParam>,
}

impl WriteCommand {
    pub fn new(did: impl Into<String>, params: Vec<RawParam>) -> Self {
        Self {
            cmd: "write".to_string(),
            did: did.into(),
            params,
        }
    }

    pub fn to_json(&self) -> Value {
        // Serialising plain strings, integers and JSON values cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A payload ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
}
