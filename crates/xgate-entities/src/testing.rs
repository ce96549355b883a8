//! Fixtures shared by unit tests.

use std::sync::Arc;

use xgate_devices::config::DeviceEntry;
use xgate_devices::{BufferedTransport, DeviceExtra, Gateway, GatewayConfig};

pub(crate) const ZDID: &str = "lumi.112233aabbcc";
pub(crate) const ZMAC: &str = "0x0000112233aabbcc";

pub(crate) fn entry(did: &str, model: &str, mac: &str) -> DeviceEntry {
    DeviceEntry {
        did: did.to_string(),
        model: model.to_string(),
        mac: mac.to_string(),
        nwk: None,
        available: true,
        extra: DeviceExtra::default(),
    }
}

pub(crate) fn gateway_from(devices: Vec<DeviceEntry>) -> (Gateway, Arc<BufferedTransport>) {
    let config = GatewayConfig {
        devices,
        ..GatewayConfig::default()
    };
    let transport = Arc::new(BufferedTransport::new());
    let gateway = Gateway::new(config, transport.clone()).expect("gateway");
    (gateway, transport)
}

/// Gateway with available devices given as `(did, model, mac)`.
pub(crate) fn gateway_with(devices: &[(&str, &str, &str)]) -> (Gateway, Arc<BufferedTransport>) {
    gateway_from(
        devices
            .iter()
            .map(|(did, model, mac)| entry(did, model, mac))
            .collect(),
    )
}
