//! Platform registry.
//!
//! Maps converters to entity factories and hands created entities to the
//! platform's add-entities callbacks. Factories are keyed from most to least
//! specific:
//!
//! | Key | Example |
//! |-----|---------|
//! | `<platform>.model.<model>` | `climate.model.lumi.airrtc.agl001` |
//! | `<platform>.attr.<attr>` | `sensor.attr.action` |
//! | `<platform>.type.<kind>` | `light.type.zigbee` |
//! | `<platform>` | `sensor` |
//!
//! Add-entities callbacks are registered per config entry and platform, and
//! may arrive after entities were created; those entities wait and are
//! delivered on registration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use xgate_devices::{Device, Gateway, Platform};

use crate::adapter::EntityAdapter;
use crate::adapters::{ActionSensor, Climate, Cover, Light, LightKind, Sensor};
use crate::entity::{Entity, EntityRef};
use crate::error::{EntityError, Result};
use crate::platform::PlatformHandle;

/// What a factory gets to build an entity from.
pub struct EntityContext<'a> {
    pub gateway: &'a Gateway,
    pub device: &'a Arc<Device>,
    pub attr: &'a str,
    pub platform: &'a Arc<dyn PlatformHandle>,
}

impl EntityContext<'_> {
    pub fn entity<A: EntityAdapter>(&self, adapter: A) -> EntityRef {
        Arc::new(Entity::new(
            self.gateway,
            self.device,
            adapter,
            self.platform.clone(),
        ))
    }
}

pub type EntityFactory = Arc<dyn Fn(&EntityContext<'_>) -> EntityRef + Send + Sync>;

/// Platform callback receiving new entities.
pub type AddEntities = Arc<dyn Fn(Vec<EntityRef>) + Send + Sync>;

type SlotKey = (String, Platform);

pub struct PlatformRegistry {
    platform: Arc<dyn PlatformHandle>,
    factories: RwLock<HashMap<String, EntityFactory>>,
    slots: Mutex<HashMap<SlotKey, AddEntities>>,
    pending: Mutex<HashMap<SlotKey, Vec<EntityRef>>>,
}

impl PlatformRegistry {
    /// Empty registry.
    pub fn new(platform: Arc<dyn PlatformHandle>) -> Self {
        Self {
            platform,
            factories: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with the built-in adapters.
    pub fn with_defaults(platform: Arc<dyn PlatformHandle>) -> Self {
        let registry = Self::new(platform);

        registry.register_factory("light", |ctx: &EntityContext<'_>| {
            ctx.entity(Light::with_kind(ctx.device, ctx.attr, LightKind::Plain))
        });
        registry.register_factory("light.type.zigbee", |ctx: &EntityContext<'_>| {
            let kind = LightKind::Zigbee {
                default_transition: ctx.device.extra().default_transition,
            };
            ctx.entity(Light::with_kind(ctx.device, ctx.attr, kind))
        });
        registry.register_factory("light.type.group", |ctx: &EntityContext<'_>| {
            ctx.entity(Light::with_kind(ctx.device, ctx.attr, LightKind::Group))
        });
        registry.register_factory("cover", |ctx: &EntityContext<'_>| {
            ctx.entity(Cover::new(ctx.attr))
        });
        registry.register_factory(
            "climate.model.lumi.airrtc.agl001",
            |ctx: &EntityContext<'_>| ctx.entity(Climate::new(ctx.device, ctx.attr)),
        );
        registry.register_factory("sensor", |ctx: &EntityContext<'_>| {
            ctx.entity(Sensor::new(ctx.attr))
        });
        registry.register_factory("sensor.attr.action", |ctx: &EntityContext<'_>| {
            ctx.entity(ActionSensor::new())
        });

        registry
    }

    /// Register or replace the factory for `key`.
    pub fn register_factory<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn(&EntityContext<'_>) -> EntityRef + Send + Sync + 'static,
    {
        self.factories.write().insert(key.into(), Arc::new(factory));
    }

    /// Most specific factory for an attribute of `device`.
    pub fn factory_for(
        &self,
        platform: Platform,
        device: &Device,
        attr: &str,
    ) -> Option<EntityFactory> {
        let keys = [
            format!("{}.model.{}", platform, device.model()),
            format!("{}.attr.{}", platform, attr),
            format!("{}.type.{}", platform, device.kind()),
            platform.to_string(),
        ];
        let factories = self.factories.read();
        keys.iter().find_map(|key| factories.get(key).cloned())
    }

    /// Build the entity for one attribute.
    pub fn create_entity(
        &self,
        gateway: &Gateway,
        device: &Arc<Device>,
        platform: Platform,
        attr: &str,
    ) -> Result<EntityRef> {
        let factory = self
            .factory_for(platform, device, attr)
            .ok_or_else(|| EntityError::UnknownPlatform(platform.to_string()))?;
        let ctx = EntityContext {
            gateway,
            device,
            attr,
            platform: &self.platform,
        };
        Ok(factory(&ctx))
    }

    /// Create entities for every converter of `device` exposed on a platform
    /// and deliver them to the config entry's callbacks.
    pub fn setup_device(
        &self,
        entry_id: &str,
        gateway: &Gateway,
        device: &Arc<Device>,
    ) -> Vec<EntityRef> {
        let mut created: HashMap<Platform, Vec<EntityRef>> = HashMap::new();
        for conv in device.converters() {
            let Some(platform) = conv.platform() else {
                continue;
            };
            match self.create_entity(gateway, device, platform, conv.attr()) {
                Ok(entity) => created.entry(platform).or_default().push(entity),
                Err(e) => tracing::warn!("{}: {} skipped: {}", device.did(), conv.attr(), e),
            }
        }

        let mut all = Vec::new();
        for (platform, entities) in created {
            all.extend(entities.iter().cloned());
            self.deliver((entry_id.to_string(), platform), entities);
        }
        tracing::info!("Set up {} entities for {}", all.len(), device.did());
        all
    }

    /// Register the add-entities callback of a platform for a config entry,
    /// flushing entities created before it.
    pub fn register_slot<F>(&self, entry_id: &str, platform: Platform, add: F)
    where
        F: Fn(Vec<EntityRef>) + Send + Sync + 'static,
    {
        let key = (entry_id.to_string(), platform);
        let add: AddEntities = Arc::new(add);
        let waiting = {
            let mut slots = self.slots.lock();
            slots.insert(key.clone(), add.clone());
            self.pending.lock().remove(&key)
        };
        if let Some(entities) = waiting {
            tracing::debug!("Flushing {} pending {} entities", entities.len(), platform);
            Self::add_and_attach(&add, entities);
        }
    }

    /// Forget the callbacks and pending entities of a config entry.
    pub fn remove_entry(&self, entry_id: &str) {
        self.slots.lock().retain(|(entry, _), _| entry != entry_id);
        self.pending.lock().retain(|(entry, _), _| entry != entry_id);
    }

    /// Entities waiting for their callback.
    pub fn pending_count(&self, entry_id: &str, platform: Platform) -> usize {
        self.pending
            .lock()
            .get(&(entry_id.to_string(), platform))
            .map_or(0, Vec::len)
    }

    fn deliver(&self, key: SlotKey, entities: Vec<EntityRef>) {
        let add = {
            let slots = self.slots.lock();
            match slots.get(&key) {
                Some(add) => add.clone(),
                None => {
                    self.pending.lock().entry(key).or_default().extend(entities);
                    return;
                }
            }
        };
        Self::add_and_attach(&add, entities);
    }

    fn add_and_attach(add: &AddEntities, entities: Vec<EntityRef>) {
        add(entities.clone());
        for entity in entities {
            if let Err(e) = entity.attach() {
                tracing::warn!("Failed to attach {}: {}", entity.entity_id(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::downcast;
    use crate::platform::RecordingPlatform;
    use crate::testing::{gateway_with, ZDID, ZMAC};

    fn registry() -> PlatformRegistry {
        PlatformRegistry::with_defaults(Arc::new(RecordingPlatform::new()))
    }

    fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(Vec<EntityRef>) + Send + Sync + 'static) {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let sink = ids.clone();
        let add = move |entities: Vec<EntityRef>| {
            sink.lock()
                .extend(entities.iter().map(|e| e.entity_id().to_string()));
        };
        (ids, add)
    }

    #[test]
    fn test_most_specific_factory_wins() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.sensor_86sw2", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        let registry = registry();

        let action = registry
            .create_entity(&gateway, &device, Platform::Sensor, "action")
            .unwrap();
        assert!(downcast::<ActionSensor>(&action).is_some());

        let battery = registry
            .create_entity(&gateway, &device, Platform::Sensor, "battery")
            .unwrap();
        assert!(downcast::<Sensor>(&battery).is_some());
    }

    #[test]
    fn test_light_type_keys() {
        let (gateway, _) = gateway_with(&[
            (ZDID, "lumi.light.acn014", ZMAC),
            ("1234567", "ikea.light.led1650r5", "1234567"),
        ]);
        let registry = registry();

        let zigbee = registry
            .create_entity(&gateway, &gateway.device(ZDID).unwrap(), Platform::Light, "light")
            .unwrap();
        let zigbee = downcast::<Light>(&zigbee).unwrap();
        assert!(matches!(zigbee.inspect(|l| l.kind()), LightKind::Zigbee { .. }));

        let mesh = registry
            .create_entity(
                &gateway,
                &gateway.device("1234567").unwrap(),
                Platform::Light,
                "light",
            )
            .unwrap();
        let mesh = downcast::<Light>(&mesh).unwrap();
        assert_eq!(mesh.inspect(|l| l.kind()), LightKind::Plain);
    }

    #[test]
    fn test_unknown_platform() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.airrtc.agl001", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        let registry = PlatformRegistry::new(Arc::new(RecordingPlatform::new()));
        assert!(matches!(
            registry.create_entity(&gateway, &device, Platform::Climate, "climate"),
            Err(EntityError::UnknownPlatform(_))
        ));
    }

    #[test]
    fn test_pending_entities_flushed_on_slot_registration() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.sensor_86sw2", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        let registry = registry();

        let created = registry.setup_device("entry1", &gateway, &device);
        assert_eq!(created.len(), 2);
        assert_eq!(registry.pending_count("entry1", Platform::Sensor), 2);
        assert!(created
            .iter()
            .all(|e| downcast::<Sensor>(e).is_some() || downcast::<ActionSensor>(e).is_some()));

        let (ids, add) = collector();
        registry.register_slot("entry1", Platform::Sensor, add);

        assert_eq!(registry.pending_count("entry1", Platform::Sensor), 0);
        let mut ids = ids.lock().clone();
        ids.sort();
        assert_eq!(
            ids,
            vec![
                "sensor.0x0000112233aabbcc_action".to_string(),
                "sensor.0x0000112233aabbcc_battery".to_string(),
            ]
        );
        // delivered entities are attached
        assert_eq!(device.listener_count(), 2);
    }

    #[test]
    fn test_registered_slot_receives_immediately() {
        let (gateway, _) = gateway_with(&[(ZDID, "lumi.curtain.acn002", ZMAC)]);
        let device = gateway.device(ZDID).unwrap();
        let registry = registry();

        let (covers, add_cover) = collector();
        registry.register_slot("entry1", Platform::Cover, add_cover);
        let (sensors, add_sensor) = collector();
        registry.register_slot("entry2", Platform::Sensor, add_sensor);

        registry.setup_device("entry1", &gateway, &device);
        assert_eq!(covers.lock().as_slice(), &["cover.0x0000112233aabbcc_motor".to_string()]);
        // battery belongs to entry1's sensor slot, which isn't registered
        assert!(sensors.lock().is_empty());
        assert_eq!(registry.pending_count("entry1", Platform::Sensor), 1);

        registry.remove_entry("entry1");
        assert_eq!(registry.pending_count("entry1", Platform::Sensor), 0);
    }
}
