//! Message bus client
//!
//! MQTT transport for everything that leaves or enters the daemon over the
//! network: outbound measurement and advertisement packets, and the inbound
//! command/legacy-telemetry subscriptions. The event loop runs on its own
//! task; the only thing it shares with the main loop is the command queue.

pub mod listener;
pub mod packet;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::error::{CryoSrvError, Result};
use listener::ListenerRouter;

/// Publish seam between the pollers and the wire.
///
/// Concrete implementation is `MqttBus`; tests substitute a recorder.
#[async_trait]
pub trait MeasurementBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// MQTT-backed bus connection.
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
    connected: Arc<Mutex<bool>>,
}

impl MqttBus {
    /// Connect and start the event loop task.
    ///
    /// Inbound publishes are handed to `router`; subscriptions are
    /// (re)established on every ConnAck so they survive broker restarts.
    pub async fn connect(config: &BrokerConfig, router: ListenerRouter) -> Result<Arc<Self>> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let connected = Arc::new(Mutex::new(false));

        let bus = Arc::new(Self {
            client: client.clone(),
            qos: qos_from(config.qos),
            connected: connected.clone(),
        });

        let topics = router.topics();
        let qos = bus.qos;
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        *connected.lock() = true;
                        info!("broker connection established");
                        for topic in &topics {
                            if let Err(err) = client.subscribe(topic, qos).await {
                                error!(topic, error = %err, "subscribe failed");
                            }
                        }
                    },
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                        router.route(&publish.topic, &payload).await;
                    },
                    Ok(event) => {
                        debug!("bus event: {event:?}");
                    },
                    Err(err) => {
                        // The event loop retries the connection itself; we
                        // just mark state and keep polling.
                        *connected.lock() = false;
                        warn!(error = %err, "broker connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    },
                }
            }
        });

        Ok(bus)
    }

    /// Cleanly disconnect from the broker.
    pub async fn disconnect(&self) {
        if let Err(err) = self.client.disconnect().await {
            warn!(error = %err, "error disconnecting from broker");
        }
        *self.connected.lock() = false;
    }
}

#[async_trait]
impl MeasurementBus for MqttBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|err| CryoSrvError::Bus(format!("publish to {topic}: {err}")))?;
        debug!(topic, bytes = payload.len(), "published");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }
}

fn qos_from(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// In-memory bus for tests: records every publish.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingBus {
    pub published: Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
#[async_trait]
impl MeasurementBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.published
            .lock()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}
