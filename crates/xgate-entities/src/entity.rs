//! Entity lifecycle.
//!
//! An [`Entity`] binds one adapter to one device: it registers the device
//! listener on attach, filters updates down to the adapter's `listen_attrs`,
//! pushes rendered state to the platform and sends commands back through the
//! gateway. It holds the device weakly, so a device removed from the registry
//! leaves the entity unavailable rather than alive.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use xgate_devices::{AttrMap, Device, Gateway, Listener, ListenerId, Platform};

use crate::adapter::EntityAdapter;
use crate::debounce::{Debouncer, UpdateSignal};
use crate::error::{EntityError, Result};
use crate::platform::{EntityState, PlatformHandle};

/// Platform entity id for an attribute of a device.
pub fn entity_id_for(platform: Platform, device: &Device, attr: &str) -> String {
    format!("{}.{}_{}", platform, device.mac(), attr)
}

/// Human-readable entity name: device name followed by the attribute.
pub fn entity_name_for(device: &Device, attr: &str) -> String {
    let device_name = device.extra().name.as_deref().unwrap_or(device.model());
    let attr_name = attr
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} {}", device_name, attr_name)
}

type Subscriptions = Vec<(Weak<Device>, ListenerId)>;

/// An adapter attached (or attachable) to a device. Cheap to clone.
pub struct Entity<A: EntityAdapter> {
    inner: Arc<EntityInner<A>>,
}

impl<A: EntityAdapter> Clone for Entity<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct EntityInner<A: EntityAdapter> {
    entity_id: String,
    name: String,
    did: String,
    device: Weak<Device>,
    gateway: Gateway,
    platform: Arc<dyn PlatformHandle>,
    adapter: Mutex<A>,
    /// `None` while detached.
    subscriptions: Mutex<Option<Subscriptions>>,
    debouncer: Debouncer,
    updates: UpdateSignal,
    group_wait: Duration,
}

impl<A: EntityAdapter> Entity<A> {
    pub fn new(
        gateway: &Gateway,
        device: &Arc<Device>,
        adapter: A,
        platform: Arc<dyn PlatformHandle>,
    ) -> Self {
        let config = gateway.config();
        Self {
            inner: Arc::new(EntityInner {
                entity_id: entity_id_for(adapter.platform(), device, adapter.attr()),
                name: entity_name_for(device, adapter.attr()),
                did: device.did().to_string(),
                device: Arc::downgrade(device),
                gateway: gateway.clone(),
                platform,
                adapter: Mutex::new(adapter),
                subscriptions: Mutex::new(None),
                debouncer: Debouncer::new(config.action_debounce()),
                updates: UpdateSignal::new(),
                group_wait: config.group_wait(),
            }),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.inner.entity_id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn device(&self) -> Option<Arc<Device>> {
        self.inner.device.upgrade()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.subscriptions.lock().is_some()
    }

    /// Run `f` against the adapter.
    pub fn inspect<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.inner.adapter.lock())
    }

    /// Restore saved state, prime from the device cache and start listening.
    ///
    /// Attaching an attached entity does nothing.
    pub fn attach(&self) -> Result<()> {
        let mut subscriptions = self.inner.subscriptions.lock();
        if subscriptions.is_some() {
            return Ok(());
        }
        let device = self.inner.device_or_removed()?;

        let weak = Arc::downgrade(&self.inner);
        let listener: Listener = Arc::new(move |data: &AttrMap| {
            if let Some(inner) = weak.upgrade() {
                inner.on_update(data);
            }
        });

        // The adapter stays locked from the snapshot until priming is done, so
        // a report racing the subscription is applied after the cached values.
        let (id, linked) = {
            let mut adapter = self.inner.adapter.lock();
            if let Some(saved) = self.inner.platform.restore_state(&self.inner.entity_id) {
                let restored: AttrMap = subset(&saved, &*adapter)
                    .into_iter()
                    .filter(|(_, v)| !v.is_null())
                    .collect();
                if !restored.is_empty() {
                    tracing::debug!("{} restored {:?}", self.inner.entity_id, restored);
                    adapter.set_state(&restored);
                }
            }
            let (id, cache) = device.subscribe(listener);
            let cached = subset(&cache, &*adapter);
            if !cached.is_empty() {
                adapter.set_state(&cached);
            }
            (id, adapter.linked_devices())
        };

        let mut list = Vec::with_capacity(2 + linked.len());
        list.push((Arc::downgrade(&device), id));

        let weak = Arc::downgrade(&self.inner);
        let id = device.add_availability_listener(Arc::new(move |_: bool| {
            if let Some(inner) = weak.upgrade() {
                inner.write_state();
            }
        }));
        list.push((Arc::downgrade(&device), id));

        for did in linked {
            let Some(child) = self.inner.gateway.device(&did) else {
                tracing::warn!("{}: linked device {} not found", self.inner.entity_id, did);
                continue;
            };
            let weak = Arc::downgrade(&self.inner);
            let parent = Arc::downgrade(&device);
            let id = child.add_listener(Arc::new(move |data: &AttrMap| {
                if let Some(inner) = weak.upgrade() {
                    inner.updates.notify();
                }
                if let Some(parent) = parent.upgrade() {
                    parent.dispatch(data);
                }
            }));
            list.push((Arc::downgrade(&child), id));
        }

        *subscriptions = Some(list);
        drop(subscriptions);

        tracing::debug!("Attached {}", self.inner.entity_id);
        self.inner.write_state();
        Ok(())
    }

    /// Stop listening and cancel pending timers.
    pub fn detach(&self) {
        self.inner.detach();
        tracing::debug!("Detached {}", self.inner.entity_id);
    }

    /// Current rendered state.
    pub fn render(&self) -> EntityState {
        let adapter = self.inner.adapter.lock();
        self.inner.render(&*adapter)
    }

    /// Send attribute writes to the device.
    pub async fn write(&self, request: AttrMap) -> Result<()> {
        let device = self.inner.device_or_removed()?;
        self.inner
            .gateway
            .route_outbound(&device, &request)
            .await
            .map_err(|e| {
                tracing::warn!("{}: command failed: {}", self.inner.entity_id, e);
                EntityError::from(e)
            })
    }

    /// Wait for any linked device to report, bounded by the group timeout.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn wait_for_update(&self) -> bool {
        let updated = self.inner.updates.wait(self.inner.group_wait).await;
        if !updated {
            tracing::debug!(
                "{}: no update within {:?}",
                self.inner.entity_id,
                self.inner.group_wait
            );
        }
        updated
    }

    /// Whether a momentary clear is scheduled.
    pub fn clear_pending(&self) -> bool {
        self.inner.debouncer.is_pending()
    }
}

impl<A: EntityAdapter> EntityInner<A> {
    fn device_or_removed(&self) -> Result<Arc<Device>> {
        self.device
            .upgrade()
            .ok_or_else(|| EntityError::DeviceRemoved(self.did.clone()))
    }

    fn on_update(self: &Arc<Self>, data: &AttrMap) {
        let (change, state) = {
            let mut adapter = self.adapter.lock();
            let changed = subset(data, &*adapter);
            if changed.is_empty() {
                return;
            }
            let change = adapter.set_state(&changed);
            (change, self.render(&*adapter))
        };

        self.platform.write_state(state);

        for mut event in change.events {
            event
                .data
                .insert("entity_id".to_string(), Value::from(self.entity_id.as_str()));
            self.platform.fire_event(event);
        }

        if change.momentary {
            let weak = Arc::downgrade(self);
            self.debouncer.restart(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.clear_momentary();
                }
            });
        }
    }

    fn clear_momentary(&self) {
        let state = {
            let mut adapter = self.adapter.lock();
            if !adapter.clear_momentary() {
                return;
            }
            self.render(&*adapter)
        };
        self.platform.write_state(state);
    }

    fn write_state(&self) {
        let state = {
            let adapter = self.adapter.lock();
            self.render(&*adapter)
        };
        self.platform.write_state(state);
    }

    fn render(&self, adapter: &A) -> EntityState {
        let mut attributes = adapter.attributes();
        attributes.insert("friendly_name".to_string(), Value::from(self.name.as_str()));
        EntityState {
            entity_id: self.entity_id.clone(),
            state: adapter.state(),
            attributes,
            available: self.device.upgrade().is_some_and(|d| d.available()),
            saved: adapter.get_state(),
        }
    }

    fn detach(&self) {
        if let Some(list) = self.subscriptions.lock().take() {
            for (device, id) in list {
                if let Some(device) = device.upgrade() {
                    device.remove_listener(id);
                }
            }
        }
        self.debouncer.cancel();
    }
}

impl<A: EntityAdapter> Drop for EntityInner<A> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Attributes of `data` the adapter listens to.
fn subset<A: EntityAdapter + ?Sized>(data: &AttrMap, adapter: &A) -> AttrMap {
    let listen = adapter.listen_attrs();
    data.iter()
        .filter(|(k, _)| listen.contains(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Type-erased entity handed to platforms.
pub trait DynEntity: Send + Sync {
    fn entity_id(&self) -> &str;
    fn platform(&self) -> Platform;
    fn attach(&self) -> Result<()>;
    fn detach(&self);
    fn render(&self) -> EntityState;
    fn as_any(&self) -> &dyn Any;
}

pub type EntityRef = Arc<dyn DynEntity>;

impl<A: EntityAdapter> DynEntity for Entity<A> {
    fn entity_id(&self) -> &str {
        Entity::entity_id(self)
    }

    fn platform(&self) -> Platform {
        self.inspect(|a| a.platform())
    }

    fn attach(&self) -> Result<()> {
        Entity::attach(self)
    }

    fn detach(&self) {
        Entity::detach(self)
    }

    fn render(&self) -> EntityState {
        Entity::render(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Recover the concrete entity behind an [`EntityRef`].
pub fn downcast<A: EntityAdapter>(entity: &EntityRef) -> Option<&Entity<A>> {
    entity.as_any().downcast_ref::<Entity<A>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{listen, StateChange};
    use crate::platform::RecordingPlatform;
    use crate::testing::{gateway_with, ZDID, ZMAC};
    use serde_json::json;
    use std::collections::BTreeSet;
    use xgate_devices::{attrs, AttrValue, RawMessage};

    struct Tracker {
        listen: BTreeSet<String>,
        seen: Arc<Mutex<Vec<AttrMap>>>,
        position: Option<i64>,
    }

    impl EntityAdapter for Tracker {
        fn platform(&self) -> Platform {
            Platform::Cover
        }
        fn attr(&self) -> &str {
            "motor"
        }
        fn listen_attrs(&self) -> &BTreeSet<String> {
            &self.listen
        }
        fn set_state(&mut self, data: &AttrMap) -> StateChange {
            self.seen.lock().push(data.clone());
            if let Some(p) = data.get("position").and_then(AttrValue::as_i64) {
                self.position = Some(p);
            }
            StateChange::none()
        }
        fn get_state(&self) -> AttrMap {
            attrs([("position", self.position.map_or(AttrValue::Null, AttrValue::from))])
        }
        fn state(&self) -> String {
            self.position.map_or("unknown".to_string(), |p| p.to_string())
        }
    }

    fn tracker() -> (Tracker, Arc<Mutex<Vec<AttrMap>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let tracker = Tracker {
            listen: listen(["position"]),
            seen: seen.clone(),
            position: None,
        };
        (tracker, seen)
    }

    #[test]
    fn test_entity_naming() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.curtain.acn002", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        assert_eq!(
            entity_id_for(Platform::Cover, &device, "motor"),
            "cover.0x0000112233aabbcc_motor"
        );
        assert_eq!(entity_name_for(&device, "run_state"), "Aqara Roller Shade E1 Run State");
    }

    #[test]
    fn test_set_state_only_sees_listened_attrs() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.curtain.acn002", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        let platform = Arc::new(RecordingPlatform::new());
        let (adapter, seen) = tracker();
        let entity = Entity::new(&gateway, &device, adapter, platform.clone());
        entity.attach().unwrap();

        gateway
            .route_inbound(ZDID, &RawMessage::resources([("8.0.2001", json!(80))]))
            .unwrap();
        gateway
            .route_inbound(
                ZDID,
                &RawMessage::resources([("1.1.85", json!(40)), ("14.4.85", json!(1))]),
            )
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.as_slice(), &[attrs([("position", 40)])]);

        let state = platform.state(entity.entity_id()).unwrap();
        assert_eq!(state.state, "40");
        assert!(state.available);
    }

    #[test]
    fn test_attach_primes_from_cache_after_restore() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.curtain.acn002", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        device.decode(&RawMessage::resources([("1.1.85", json!(70))]));

        let platform = Arc::new(RecordingPlatform::new());
        platform.seed("cover.0x0000112233aabbcc_motor", attrs([("position", 10)]));

        let (adapter, seen) = tracker();
        let entity = Entity::new(&gateway, &device, adapter, platform.clone());
        entity.attach().unwrap();
        entity.attach().unwrap();

        assert_eq!(
            seen.lock().as_slice(),
            &[attrs([("position", 10)]), attrs([("position", 70)])]
        );
        assert_eq!(device.listener_count(), 1);
        assert_eq!(entity.render().state, "70");
    }

    #[test]
    fn test_restore_skips_unset_values() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.curtain.acn002", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        let platform = Arc::new(RecordingPlatform::new());
        platform.seed(
            "cover.0x0000112233aabbcc_motor",
            attrs([("position", AttrValue::Null)]),
        );

        let (adapter, seen) = tracker();
        let entity = Entity::new(&gateway, &device, adapter, platform);
        entity.attach().unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_detach_stops_updates() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.curtain.acn002", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        let (adapter, seen) = tracker();
        let entity = Entity::new(&gateway, &device, adapter, Arc::new(RecordingPlatform::new()));

        entity.attach().unwrap();
        entity.detach();
        assert!(!entity.is_attached());
        assert_eq!(device.listener_count(), 0);

        device.decode(&RawMessage::resources([("1.1.85", json!(55))]));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_removed_device() {
        let (gateway, transport) = gateway_with(&[(ZDID, "lumi.curtain.acn002", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        let (adapter, _) = tracker();
        let entity = Entity::new(&gateway, &device, adapter, Arc::new(RecordingPlatform::new()));
        entity.attach().unwrap();

        drop(device);
        gateway.remove_device(ZDID);

        assert!(entity.device().is_none());
        assert!(!entity.render().available);
        let err = entity.write(attrs([("position", 50)])).await.unwrap_err();
        assert!(matches!(err, EntityError::DeviceRemoved(_)));
        assert!(transport.messages().is_empty());
    }

    #[test]
    fn test_downcast() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.curtain.acn002", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        let (adapter, _) = tracker();
        let entity: EntityRef = Arc::new(Entity::new(
            &gateway,
            &device,
            adapter,
            Arc::new(RecordingPlatform::new()),
        ));
        assert_eq!(entity.platform(), Platform::Cover);
        assert!(downcast::<Tracker>(&entity).is_some());
    }
}
