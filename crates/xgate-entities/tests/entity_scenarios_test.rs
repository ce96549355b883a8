//! Entity scenario tests
//!
//! End-to-end flows from wire reports through devices to rendered entity
//! state, and from entity commands back to published writes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use xgate_devices::{BufferedTransport, Gateway, GatewayConfig, RawMessage, RawParam};
use xgate_entities::{
    ActionSensor, Climate, Cover, Entity, Light, LightParams, RecordingPlatform, CLICK_EVENT,
};

const ZDID: &str = "lumi.112233aabbcc";
const ZMAC: &str = "0x0000112233aabbcc";

fn setup(toml: &str) -> (Gateway, Arc<BufferedTransport>, Arc<RecordingPlatform>) {
    let config = GatewayConfig::from_toml_str(toml).unwrap();
    let transport = Arc::new(BufferedTransport::new());
    let gateway = Gateway::new(config, transport.clone()).unwrap();
    (gateway, transport, Arc::new(RecordingPlatform::new()))
}

fn zigbee(model: &str) -> String {
    format!(
        "[[devices]]\ndid = \"{}\"\nmodel = \"{}\"\nmac = \"{}\"\nnwk = \"0x12ab\"\n",
        ZDID, model, ZMAC
    )
}

#[tokio::test(start_paused = true)]
async fn test_button_action_fires_and_clears() {
    let (gateway, _, platform) = setup(&zigbee("lumi.sensor_86sw2"));
    let device = gateway.device(ZDID).unwrap();
    let button = Entity::new(&gateway, &device, ActionSensor::new(), platform.clone());
    button.attach().unwrap();

    let state = platform.state(button.entity_id()).unwrap();
    assert_eq!(state.state, "");
    assert_eq!(
        serde_json::Value::Object(state.attributes),
        json!({
            "device_class": "action",
            "friendly_name": "Aqara Double Wall Button Action",
            "icon": "mdi:bell",
        })
    );

    gateway
        .route_inbound(ZDID, &RawMessage::resources([("13.1.85", json!(1))]))
        .unwrap();

    assert_eq!(platform.state(button.entity_id()).unwrap().state, "button_1_single");
    let events = platform.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, CLICK_EVENT);
    assert_eq!(
        serde_json::Value::Object(events[0].data.clone()),
        json!({
            "entity_id": "sensor.0x0000112233aabbcc_action",
            "click_type": "button_1_single",
        })
    );
    assert!(button.clear_pending());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(platform.state(button.entity_id()).unwrap().state, "");
    assert!(!button.clear_pending());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_press_restarts_clear() {
    let (gateway, _, platform) = setup(&zigbee("lumi.sensor_86sw2"));
    let device = gateway.device(ZDID).unwrap();
    let button = Entity::new(&gateway, &device, ActionSensor::new(), platform.clone());
    button.attach().unwrap();

    let press = RawMessage::resources([("13.1.85", json!(1))]);
    gateway.route_inbound(ZDID, &press).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    gateway.route_inbound(ZDID, &press).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(platform.state(button.entity_id()).unwrap().state, "button_1_single");
    assert_eq!(platform.events().len(), 2);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(platform.state(button.entity_id()).unwrap().state, "");
}

#[tokio::test]
async fn test_thermostat_e1() {
    let (gateway, transport, platform) = setup(&zigbee("lumi.airrtc.agl001"));
    let device = gateway.device(ZDID).unwrap();
    let adapter = Climate::new(&device, "climate");
    let climate = Entity::new(&gateway, &device, adapter, platform.clone());
    climate.attach().unwrap();

    let state = platform.state(climate.entity_id()).unwrap();
    assert_eq!(climate.entity_id(), "climate.0x0000112233aabbcc_climate");
    assert_eq!(state.state, "unknown");
    assert_eq!(state.attributes["hvac_modes"], json!(["off", "heat", "auto"]));
    assert_eq!(state.attributes["friendly_name"], "Aqara Thermostat E1 Climate");

    let report = |resource: &str, value: serde_json::Value| {
        gateway
            .route_inbound(ZDID, &RawMessage::resources([(resource, value)]))
            .unwrap();
        platform.state(climate.entity_id()).unwrap()
    };

    let state = report("1.8.85", json!(2300));
    assert_eq!(state.state, "unknown");
    assert_eq!(state.attributes["temperature"], json!(23.0));

    assert_eq!(report("4.21.85", json!(1)).state, "unknown");
    assert_eq!(report("14.51.85", json!(0)).state, "heat");

    climate.set_temperature(22.5).await.unwrap();

    let messages = transport.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "zigbee/recv");
    assert_eq!(
        messages[0].payload,
        json!({
            "params": [{"res_name": "1.8.85", "value": 2250.0}],
            "cmd": "write",
            "did": "lumi.112233aabbcc",
        })
    );
    assert!(!messages[0].retain);

    let err = climate.set_temperature(31.0).await.unwrap_err();
    assert!(err.is_command_failure());
    assert!(transport.messages().is_empty());
}

#[tokio::test]
async fn test_cover_position_and_commands() {
    let (gateway, transport, platform) = setup(&zigbee("lumi.curtain.acn002"));
    let device = gateway.device(ZDID).unwrap();
    let cover = Entity::new(&gateway, &device, Cover::new("motor"), platform.clone());
    cover.attach().unwrap();

    gateway
        .route_inbound(ZDID, &RawMessage::resources([("1.1.85", json!(2))]))
        .unwrap();
    assert_eq!(cover.inspect(|c| c.is_closed()), Some(true));
    assert_eq!(platform.state(cover.entity_id()).unwrap().state, "closed");

    gateway
        .route_inbound(ZDID, &RawMessage::resources([("1.1.85", json!(3))]))
        .unwrap();
    assert_eq!(cover.inspect(|c| c.is_closed()), Some(false));

    cover.open().await.unwrap();
    cover.set_position(60).await.unwrap();

    let params: Vec<_> = transport
        .take()
        .into_iter()
        .map(|m| m.payload["params"].clone())
        .collect();
    assert_eq!(
        params,
        vec![
            json!([{"res_name": "14.2.85", "value": 1}]),
            json!([{"res_name": "1.1.85", "value": 60}]),
        ]
    );
}

#[tokio::test]
async fn test_zigbee_light_writes_transition_last() {
    let (gateway, transport, platform) = setup(&zigbee("lumi.light.acn014"));
    let device = gateway.device(ZDID).unwrap();
    let light = Entity::new(&gateway, &device, Light::new(&device, "light"), platform);
    light.attach().unwrap();

    light
        .turn_on(LightParams {
            transition: Some(1.5),
            color_temp: Some(300),
            brightness: Some(255),
            ..Default::default()
        })
        .await
        .unwrap();

    let messages = transport.take();
    assert_eq!(
        messages[0].payload["params"],
        json!([
            {"cluster": 8, "attr": 0, "value": 254},
            {"cluster": 768, "attr": 7, "value": 300},
            {"cluster": 8, "attr": 16, "value": 15.0},
        ])
    );
}

const GROUP_CONFIG: &str = r#"
[[devices]]
did = "1234567"
model = "ikea.light.led1650r5"
mac = "1234567"

[[devices]]
did = "group.1"
model = "group.light"
mac = "group.1"
childs = ["1234567", "missing.child"]
"#;

fn child_on() -> RawMessage {
    RawMessage::new(vec![RawParam::Property {
        siid: 2,
        piid: 1,
        value: json!(true),
    }])
}

#[tokio::test(start_paused = true)]
async fn test_group_command_times_out_without_child_report() {
    let (gateway, transport, platform) = setup(GROUP_CONFIG);
    let group = gateway.device("group.1").unwrap();
    let light = Entity::new(&gateway, &group, Light::new(&group, "light"), platform);
    light.attach().unwrap();

    let start = tokio::time::Instant::now();
    light.turn_on(LightParams::default()).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(10));

    let messages = transport.take();
    assert_eq!(messages[0].topic, "miio/recv");
    assert_eq!(messages[0].payload["did"], "group.1");
}

#[tokio::test(start_paused = true)]
async fn test_group_command_returns_on_child_report() {
    let (gateway, _, platform) = setup(GROUP_CONFIG);
    let group = gateway.device("group.1").unwrap();
    let light = Entity::new(&gateway, &group, Light::new(&group, "light"), platform.clone());
    light.attach().unwrap();

    let reporter = gateway.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        reporter.route_inbound("1234567", &child_on()).unwrap();
    });

    let start = tokio::time::Instant::now();
    light.turn_on(LightParams::default()).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));

    // the child's report reached the group entity
    assert_eq!(platform.state(light.entity_id()).unwrap().state, "on");
}

#[tokio::test]
async fn test_group_detach_drops_child_listener() {
    let (gateway, _, platform) = setup(GROUP_CONFIG);
    let group = gateway.device("group.1").unwrap();
    let child = gateway.device("1234567").unwrap();
    let light = Entity::new(&gateway, &group, Light::new(&group, "light"), platform);

    light.attach().unwrap();
    assert_eq!(child.listener_count(), 1);
    light.detach();
    assert_eq!(child.listener_count(), 0);
    assert_eq!(group.listener_count(), 0);
}

#[tokio::test]
async fn test_unavailable_device_catches_up() {
    let (gateway, _, platform) = setup(&zigbee("lumi.curtain.acn002"));
    let device = gateway.device(ZDID).unwrap();
    let cover = Entity::new(&gateway, &device, Cover::new("motor"), platform.clone());
    cover.attach().unwrap();

    device.set_available(false);
    gateway
        .route_inbound(ZDID, &RawMessage::resources([("1.1.85", json!(80))]))
        .unwrap();
    assert_eq!(cover.inspect(|c| c.position()), None);
    assert!(!cover.render().available);

    device.set_available(true);
    assert_eq!(cover.inspect(|c| c.position()), Some(80));
    let state = platform.state(cover.entity_id()).unwrap();
    assert!(state.available);
    assert_eq!(state.state, "open");
}

#[tokio::test]
async fn test_availability_reaches_platform_state() {
    let config = format!("{}available = false\n", zigbee("lumi.curtain.acn002"));
    let (gateway, _, platform) = setup(&config);
    let device = gateway.device(ZDID).unwrap();
    let cover = Entity::new(&gateway, &device, Cover::new("motor"), platform.clone());
    cover.attach().unwrap();
    assert!(!platform.state(cover.entity_id()).unwrap().available);

    // nothing cached, the flip alone updates the platform
    device.set_available(true);
    assert!(platform.state(cover.entity_id()).unwrap().available);

    device.set_available(false);
    assert!(!platform.state(cover.entity_id()).unwrap().available);

    device.set_available(true);
    drop(device);
    gateway.remove_device(ZDID);
    assert!(!platform.state(cover.entity_id()).unwrap().available);
}

#[test]
fn test_detached_entity_ignores_availability() {
    let (gateway, _, platform) = setup(&zigbee("lumi.curtain.acn002"));
    let device = gateway.device(ZDID).unwrap();
    let cover = Entity::new(&gateway, &device, Cover::new("motor"), platform.clone());
    cover.attach().unwrap();
    cover.detach();
    assert_eq!(device.availability_listener_count(), 0);

    device.set_available(false);
    assert!(platform.state(cover.entity_id()).unwrap().available);
}

#[test]
fn test_attach_during_reports_ends_on_latest_value() {
    let (gateway, _, platform) = setup(&zigbee("lumi.curtain.acn002"));
    let device = gateway.device(ZDID).unwrap();

    for round in 0..50 {
        let cover = Entity::new(&gateway, &device, Cover::new("motor"), platform.clone());
        std::thread::scope(|s| {
            s.spawn(|| {
                for step in 0..20 {
                    let raw = RawMessage::resources([("1.1.85", json!(round + step))]);
                    gateway.route_inbound(ZDID, &raw).unwrap();
                }
            });
            cover.attach().unwrap();
        });

        let cached = device.get("position").and_then(|v| v.as_i64());
        assert_eq!(cover.inspect(|c| c.position()), cached);
        cover.detach();
    }
}

#[test]
fn test_button_clears_without_runtime() {
    let (gateway, _, platform) = setup(&zigbee("lumi.sensor_86sw2"));
    let device = gateway.device(ZDID).unwrap();
    let button = Entity::new(&gateway, &device, ActionSensor::new(), platform.clone());
    button.attach().unwrap();

    gateway
        .route_inbound(ZDID, &RawMessage::resources([("13.1.85", json!(1))]))
        .unwrap();

    assert_eq!(platform.events().len(), 1);
    assert_eq!(platform.state(button.entity_id()).unwrap().state, "");
    assert!(!button.clear_pending());
}
