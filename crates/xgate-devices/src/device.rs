//! Device: identity, converters, attribute cache and listener fan-out.
//!
//! A device is shared as `Arc<Device>` between the gateway registry and the
//! entities built for it. The cache and listener set each sit behind their own
//! lock; decode and dispatch for one device are serialized so a listener never
//! observes two messages interleaved.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::attribute::{AttrMap, AttrValue};
use crate::converter::{Address, Codec, Converter};
use crate::error::{Error, Result};
use crate::wire::{RawMessage, RawParam, WriteCommand};

/// Callback invoked with the changed attributes of a device.
pub type Listener = Arc<dyn Fn(&AttrMap) + Send + Sync>;

/// Callback invoked with the new availability of a device.
pub type AvailabilityListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned when registering either kind of listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Protocol family of a device as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Zigbee,
    Mesh,
    Ble,
    /// Vendor mesh group controlling several child devices.
    Group,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zigbee => "zigbee",
            Self::Mesh => "mesh",
            Self::Ble => "ble",
            Self::Group => "group",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Model string, e.g. `lumi.sensor_86sw2`
    pub model: String,
    /// Unique device id, e.g. `lumi.112233aabbcc`
    pub did: String,
    /// Hardware address, e.g. `0x0000112233aabbcc`
    pub mac: String,
    /// Network address (ZigBee short address)
    #[serde(default)]
    pub nwk: Option<String>,
}

impl DeviceIdentity {
    pub fn new(model: impl Into<String>, did: impl Into<String>, mac: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            did: did.into(),
            mac: mac.into(),
            nwk: None,
        }
    }

    pub fn with_nwk(mut self, nwk: impl Into<String>) -> Self {
        self.nwk = Some(nwk.into());
        self
    }
}

/// Per-device options and references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceExtra {
    /// Human-readable name, used for entity naming.
    #[serde(default)]
    pub name: Option<String>,
    /// Transition applied to light commands that don't name one (seconds).
    #[serde(default)]
    pub default_transition: Option<f64>,
    /// Device ids of group members.
    #[serde(default)]
    pub childs: Vec<String>,
}

#[derive(Debug, Default)]
struct DeviceState {
    available: bool,
    cache: AttrMap,
    last_seen: Option<i64>,
}

/// A single end device.
pub struct Device {
    identity: DeviceIdentity,
    kind: DeviceKind,
    converters: Vec<Converter>,
    by_address: HashMap<Address, usize>,
    attrs: HashSet<String>,
    momentary: HashSet<String>,
    extra: DeviceExtra,
    state: Mutex<DeviceState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    availability_listeners: Mutex<Vec<(ListenerId, AvailabilityListener)>>,
    next_listener: AtomicU64,
    /// Serializes decode/dispatch cycles.
    dispatch_lock: Mutex<()>,
    /// Serializes outbound writes, held across publish.
    write_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("converters", &self.converters.len())
            .field("available", &self.available())
            .finish()
    }
}

impl Device {
    /// Create a device from its resolved converter list.
    ///
    /// Converter order is the device's canonical write order. Two converters
    /// for the same attribute, or for the same wire address, are a
    /// configuration error.
    pub fn new(
        identity: DeviceIdentity,
        kind: DeviceKind,
        converters: Vec<Converter>,
    ) -> Result<Self> {
        let mut by_address = HashMap::new();
        let mut attrs = HashSet::new();
        let mut momentary = HashSet::new();
        let mut declared = HashSet::new();

        for (idx, conv) in converters.iter().enumerate() {
            if !declared.insert(conv.attr()) {
                return Err(Error::Config(format!(
                    "duplicate converter for '{}' on {}",
                    conv.attr(),
                    identity.model
                )));
            }
            attrs.extend(conv.emits().into_iter().map(str::to_string));
            if *conv.address() != Address::Virtual
                && by_address.insert(conv.address().clone(), idx).is_some()
            {
                return Err(Error::Config(format!(
                    "duplicate converter for {} on {}",
                    conv.address(),
                    identity.model
                )));
            }
            if matches!(conv.codec(), Codec::Button { .. }) {
                momentary.extend(conv.emits().into_iter().map(str::to_string));
            }
        }

        Ok(Self {
            identity,
            kind,
            converters,
            by_address,
            attrs,
            momentary,
            extra: DeviceExtra::default(),
            state: Mutex::new(DeviceState::default()),
            listeners: Mutex::new(Vec::new()),
            availability_listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            dispatch_lock: Mutex::new(()),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_extra(mut self, extra: DeviceExtra) -> Self {
        self.extra = extra;
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn did(&self) -> &str {
        &self.identity.did
    }

    pub fn mac(&self) -> &str {
        &self.identity.mac
    }

    pub fn model(&self) -> &str {
        &self.identity.model
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn extra(&self) -> &DeviceExtra {
        &self.extra
    }

    pub fn converters(&self) -> &[Converter] {
        &self.converters
    }

    pub fn converter(&self, attr: &str) -> Option<&Converter> {
        self.converters.iter().find(|c| c.attr() == attr)
    }

    pub fn has_attr(&self, attr: &str) -> bool {
        self.attrs.contains(attr)
    }

    /// Whether `attr` is an impulse value that is reported but never cached.
    pub fn is_momentary(&self, attr: &str) -> bool {
        self.momentary.contains(attr)
    }

    pub fn available(&self) -> bool {
        self.state.lock().available
    }

    /// Toggle availability.
    ///
    /// Becoming available dispatches the full cache, so listeners catch up
    /// with values decoded while dispatch was gated. Availability listeners
    /// hear every transition, after the catch-up dispatch.
    pub fn set_available(&self, available: bool) {
        let _serial = self.dispatch_lock.lock();
        let snapshot = {
            let mut state = self.state.lock();
            let was = std::mem::replace(&mut state.available, available);
            if was == available {
                return;
            }
            tracing::info!(
                "Device {} is now {}",
                self.identity.did,
                if available { "available" } else { "unavailable" }
            );
            if available {
                state.cache.clone()
            } else {
                AttrMap::new()
            }
        };
        if !snapshot.is_empty() {
            self.notify(&snapshot);
        }
        let listeners: Vec<AvailabilityListener> = self
            .availability_listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(available);
        }
    }

    /// Copy of the attribute cache.
    pub fn cache(&self) -> AttrMap {
        self.state.lock().cache.clone()
    }

    pub fn get(&self, attr: &str) -> Option<AttrValue> {
        self.state.lock().cache.get(attr).cloned()
    }

    /// Unix timestamp of the last decoded message.
    pub fn last_seen(&self) -> Option<i64> {
        self.state.lock().last_seen
    }

    /// Decode a raw message and dispatch the changes.
    ///
    /// Returns the attributes that changed or were newly populated. Params
    /// with no converter, or whose value the converter rejects, are dropped
    /// without affecting the rest of the message. Momentary attributes are
    /// always reported and never cached.
    pub fn decode(&self, raw: &RawMessage) -> AttrMap {
        let _serial = self.dispatch_lock.lock();

        let mut decoded = AttrMap::new();
        for param in &raw.params {
            let address = param.address();
            let Some(conv) = self.by_address.get(&address).map(|&i| &self.converters[i]) else {
                tracing::debug!("{}: no converter for {}, dropped", self.identity.did, address);
                continue;
            };
            let mut out = AttrMap::new();
            match conv.decode(param.value(), &mut out) {
                Ok(()) => decoded.extend(out),
                Err(e) => {
                    tracing::warn!("{}: {}, dropped", self.identity.did, e);
                }
            }
        }

        let (changed, available) = {
            let mut state = self.state.lock();
            state.last_seen = Some(chrono::Utc::now().timestamp());

            let mut changed = AttrMap::new();
            for (attr, value) in decoded {
                if !self.attrs.contains(&attr) {
                    continue;
                }
                if self.momentary.contains(&attr) {
                    changed.insert(attr, value);
                    continue;
                }
                if state.cache.get(&attr) != Some(&value) {
                    state.cache.insert(attr.clone(), value.clone());
                    changed.insert(attr, value);
                }
            }
            (changed, state.available)
        };

        tracing::debug!("{} decoded {:?}", self.identity.did, changed);

        if available && !changed.is_empty() {
            self.notify(&changed);
        }
        changed
    }

    /// Encode a write request into one command for this device.
    ///
    /// Params follow the converter list order, whatever order the request
    /// has. Any attribute without a writable converter rejects the whole
    /// request.
    pub fn write(&self, request: &AttrMap) -> Result<WriteCommand> {
        if request.is_empty() {
            return Err(Error::rejected(self.identity.did.as_str(), "empty write request"));
        }
        if let Some(attr) = request.keys().find(|a| self.converter(a).is_none()) {
            return Err(Error::rejected(attr.as_str(), "no converter for attribute"));
        }
        if self.kind == DeviceKind::Ble {
            let attr = request.keys().next().map(String::as_str).unwrap_or_default();
            return Err(Error::rejected(attr, "BLE devices are read-only"));
        }

        let mut params = Vec::with_capacity(request.len());
        for conv in &self.converters {
            let Some(value) = request.get(conv.attr()) else {
                continue;
            };
            let wire = conv.encode(value)?;
            let param = RawParam::new(conv.address(), wire)
                .ok_or_else(|| Error::rejected(conv.attr(), "attribute has no wire address"))?;
            params.push(param);
        }

        Ok(WriteCommand::new(self.identity.did.clone(), params))
    }

    /// Fan out an externally produced attribute map to all listeners.
    pub fn dispatch(&self, data: &AttrMap) {
        if data.is_empty() {
            return;
        }
        let _serial = self.dispatch_lock.lock();
        self.notify(data);
    }

    pub fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = self.next_id();
        self.listeners.lock().push((id, listener));
        id
    }

    /// Register a listener and return the cache as of registration.
    ///
    /// Holds the dispatch lock across both, so every change after the
    /// returned snapshot reaches the listener.
    pub fn subscribe(&self, listener: Listener) -> (ListenerId, AttrMap) {
        let _serial = self.dispatch_lock.lock();
        let snapshot = self.cache();
        (self.add_listener(listener), snapshot)
    }

    pub fn add_availability_listener(&self, listener: AvailabilityListener) -> ListenerId {
        let id = self.next_id();
        self.availability_listeners.lock().push((id, listener));
        id
    }

    /// Remove a listener of either kind. Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
        self.availability_listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Number of attribute listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn availability_listener_count(&self) -> usize {
        self.availability_listeners.lock().len()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    /// Lock held by the gateway across encode and publish.
    pub(crate) fn write_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.write_lock
    }

    fn notify(&self, data: &AttrMap) {
        // Snapshot so listeners may add or remove listeners.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(data);
        }
    }
}
