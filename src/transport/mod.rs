//! Message bus abstraction for occupancy status.
//!
//! `MqttBus` talks to a real broker; `RecordingBus` keeps every publish in
//! memory for tests and dry runs.

mod endpoint;
mod mqtt;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{NotifierError, Result};

pub use endpoint::{
    parse_mqtt_endpoint, MqttEndpoint, TlsMaterials, DEFAULT_MQTTS_PORT, DEFAULT_MQTT_PORT,
};
pub use mqtt::{MqttBus, MqttSettings, DEFAULT_CONNECT_TIMEOUT};

pub const DEFAULT_TOPIC: &str = "People_entry_exit_counter";
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;

/// Publish/subscribe connection shared with the publisher thread.
pub trait MessageBus: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<()>;
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
    /// Close the connection. Calling it twice is a no-op.
    fn disconnect(&self) -> Result<()>;
}

/// Body of a status message: `{"Person": 0}` or `{"Person": 1}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(rename = "Person")]
    pub person: u8,
}

impl StatusPayload {
    pub fn from_occupied(occupied: bool) -> Self {
        Self {
            person: u8::from(occupied),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(NotifierError::transport)
    }
}

/// In-memory bus that records subscriptions and publishes.
#[derive(Debug, Default)]
pub struct RecordingBus {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    subscriptions: Mutex<Vec<String>>,
    fail_publish: AtomicBool,
    disconnected: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Decoded status payloads in publish order.
    pub fn statuses(&self) -> Vec<StatusPayload> {
        self.published()
            .iter()
            .filter_map(|(_, body)| serde_json::from_slice(body).ok())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl MessageBus for RecordingBus {
    fn subscribe(&self, topic: &str) -> Result<()> {
        let mut subs = self
            .subscriptions
            .lock()
            .map_err(|_| NotifierError::transport("recording bus poisoned"))?;
        subs.push(topic.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(NotifierError::transport("publish after disconnect"));
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(NotifierError::transport("broker unavailable"));
        }
        let mut published = self
            .published
            .lock()
            .map_err(|_| NotifierError::transport("recording bus poisoned"))?;
        published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
