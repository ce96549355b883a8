//! Transport interface.
//!
//! Connection management, reconnects and authentication belong to the
//! transport implementation; the gateway only publishes payloads and consumes
//! an inbound stream.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::wire::WireMessage;

/// Publish side of a gateway connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload. Failures are reported once, never retried here.
    async fn publish(&self, topic: &str, payload: &Value, retain: bool) -> Result<()>;
}

/// Transport that records every publication.
///
/// Used in tests and for verifying outbound ordering.
#[derive(Debug, Default)]
pub struct BufferedTransport {
    buffer: Mutex<Vec<WireMessage>>,
    fail_with: Mutex<Option<String>>,
}

impl BufferedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publications so far, oldest first.
    pub fn messages(&self) -> Vec<WireMessage> {
        self.buffer.lock().clone()
    }

    pub fn take(&self) -> Vec<WireMessage> {
        std::mem::take(&mut *self.buffer.lock())
    }

    /// Make every following publish fail with `reason`; `None` restores it.
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.fail_with.lock() = reason.map(str::to_string);
    }
}

#[async_trait]
impl Transport for BufferedTransport {
    async fn publish(&self, topic: &str, payload: &Value, retain: bool) -> Result<()> {
        if let Some(reason) = self.fail_with.lock().clone() {
            return Err(Error::Publish(reason));
        }
        self.buffer.lock().push(WireMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            retain,
        });
        Ok(())
    }
}
