use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};

use super::endpoint::{MqttEndpoint, TlsMaterials};
use super::MessageBus;
use crate::error::{NotifierError, Result};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause before the event loop is polled again after a dropped connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Connection parameters for the broker.
#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub client_id: String,
    pub keep_alive: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    /// How long `connect` waits for the broker's CONNACK.
    pub connect_timeout: Duration,
}

/// MQTT v5 client with a background thread driving the event loop.
///
/// Once the session is up, connection errors are logged and the event loop is
/// polled again, which makes rumqttc reconnect. The driver only exits after
/// `disconnect` has been requested.
pub struct MqttBus {
    client: Client,
    closing: Arc<AtomicBool>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Connect and wait for the broker to accept the session.
    pub fn connect(settings: &MqttSettings, tls: &TlsMaterials) -> Result<Self> {
        let transport = tls
            .build_transport(&settings.endpoint)
            .context("invalid MQTT transport settings")
            .map_err(|e| NotifierError::transport(format!("{:#}", e)))?;

        let mut options = MqttOptions::new(
            settings.client_id.as_str(),
            settings.endpoint.host.as_str(),
            settings.endpoint.port,
        );
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(transport);

        let (client, connection) = Client::new(options, 10);
        let (ready_tx, ready_rx) = mpsc::channel();
        let closing = Arc::new(AtomicBool::new(false));
        let handle = spawn_driver(connection, ready_tx, closing.clone());

        match ready_rx.recv_timeout(settings.connect_timeout) {
            Ok(Ok(())) => {
                log::info!(
                    "Connected to MQTT broker {} (keepalive {}s, auth: {})",
                    settings.endpoint,
                    settings.keep_alive.as_secs(),
                    settings.username.is_some()
                );
                Ok(Self {
                    client,
                    closing,
                    connection_handle: Mutex::new(Some(handle)),
                })
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(NotifierError::Transport(format!(
                    "cannot connect to MQTT broker {}: {}",
                    settings.endpoint, reason
                )))
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                // The driver exits on its own once the attempt errors out.
                closing.store(true, Ordering::SeqCst);
                let _ = client.try_disconnect();
                Err(NotifierError::Transport(format!(
                    "MQTT broker {} did not answer within {:?}",
                    settings.endpoint, settings.connect_timeout
                )))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum DriverStep {
    Reconnect,
    Stop,
}

/// What the driver does after a connection error.
///
/// A failure before the first CONNACK is a startup error; after that, only a
/// requested disconnect stops the driver.
fn after_connection_error(session_established: bool, closing: bool) -> DriverStep {
    if session_established && !closing {
        DriverStep::Reconnect
    } else {
        DriverStep::Stop
    }
}

fn spawn_driver(
    mut connection: Connection,
    ready: Sender<std::result::Result<(), String>>,
    closing: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut ready = Some(ready);
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Ok(()));
                    }
                    None => log::info!("MQTT session re-established"),
                },
                Ok(Event::Incoming(packet)) => log::trace!("MQTT incoming: {:?}", packet),
                Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    let is_closing = closing.load(Ordering::SeqCst);
                    match after_connection_error(ready.is_none(), is_closing) {
                        DriverStep::Reconnect => {
                            log::warn!(
                                "MQTT connection error: {}. Reconnecting in {:?}",
                                e,
                                RECONNECT_DELAY
                            );
                            std::thread::sleep(RECONNECT_DELAY);
                        }
                        DriverStep::Stop => {
                            if let Some(tx) = ready.take() {
                                let _ = tx.send(Err(e.to_string()));
                            }
                            break;
                        }
                    }
                }
            }
        }
    })
}

impl MessageBus for MqttBus {
    fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .map_err(NotifierError::transport)
    }

    /// Queues without blocking, so a stalled connection surfaces as a failed
    /// publish instead of a stuck publisher thread.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(NotifierError::transport)
    }

    fn disconnect(&self) -> Result<()> {
        let handle = match self.connection_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return Ok(());
        };
        self.closing.store(true, Ordering::SeqCst);
        let result = self.client.disconnect().map_err(NotifierError::transport);
        if handle.join().is_err() {
            log::warn!("MQTT connection thread panicked");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_session_is_retried_until_disconnect() {
        assert_eq!(after_connection_error(true, false), DriverStep::Reconnect);
        assert_eq!(after_connection_error(true, true), DriverStep::Stop);
    }

    #[test]
    fn failure_before_connack_stops_the_driver() {
        assert_eq!(after_connection_error(false, false), DriverStep::Stop);
        assert_eq!(after_connection_error(false, true), DriverStep::Stop);
    }
}
