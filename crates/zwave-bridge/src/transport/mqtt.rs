//! rumqttc implementation of the bus seam
//!
//! The event loop runs in a spawned task. rumqttc reconnects on the next poll
//! after a failure, so the task only reports the failure and waits
//! `reconnect_period` before polling again. Subscriptions are recorded per
//! client and re-issued whenever the broker answers a reconnect without a
//! stored session.
//!
//! Requests are only queued by [`AsyncClient`]; they reach the broker while
//! the event loop is polled. Disconnecting therefore waits for the loop to
//! send the DISCONNECT packet before the task is released.

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{BusClient, BusConnector, BusEvent, LastWill};
use crate::config::MqttConfig;
use crate::error::Result;

/// Time allowed for queued requests and the DISCONNECT packet to go out
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

fn qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Topics subscribed by one client, in first-subscription order
#[derive(Debug, Default)]
struct SubscriptionLedger {
    topics: Vec<(String, QoS)>,
}

impl SubscriptionLedger {
    fn record(&mut self, topic: &str, level: QoS) {
        match self.topics.iter_mut().find(|(t, _)| t == topic) {
            Some(entry) => entry.1 = level,
            None => self.topics.push((topic.to_string(), level)),
        }
    }

    fn filters(&self) -> Vec<SubscribeFilter> {
        self.topics
            .iter()
            .map(|(topic, level)| SubscribeFilter::new(topic.clone(), *level))
            .collect()
    }
}

/// Connector for MQTT brokers
#[derive(Debug, Clone, Default)]
pub struct MqttConnector;

impl MqttConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }

    fn options(config: &MqttConfig, client_id: &str, will: LastWill) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(config.clean);
        options.set_last_will(rumqttc::LastWill::new(
            will.topic,
            will.payload,
            qos(will.qos),
            will.retain,
        ));

        if config.auth {
            options.set_credentials(&config.username, &config.password);
        }
        options
    }
}

#[async_trait]
impl BusConnector for MqttConnector {
    async fn connect(
        &self,
        config: &MqttConfig,
        client_id: &str,
        will: LastWill,
    ) -> Result<(Box<dyn BusClient>, mpsc::Receiver<BusEvent>)> {
        info!(host = %config.host, port = config.port, client_id, "Connecting to MQTT broker");

        let options = Self::options(config, client_id, will);
        let (client, eventloop) = AsyncClient::new(options, 10);
        let ledger = Arc::new(Mutex::new(SubscriptionLedger::default()));

        let (tx, rx) = mpsc::channel(256);
        let task = tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&ledger),
            tx,
            config.reconnect_period,
        ));

        let client = MqttClient {
            client,
            ledger,
            task: Mutex::new(Some(task)),
        };
        Ok((Box::new(client), rx))
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    ledger: Arc<Mutex<SubscriptionLedger>>,
    tx: mpsc::Sender<BusEvent>,
    reconnect_period: Duration,
) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(session_present = ack.session_present, "MQTT connection acknowledged");
                if !ack.session_present {
                    restore_subscriptions(&client, &ledger);
                }
                BusEvent::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(topic = %publish.topic, size = publish.payload.len(), "MQTT message");
                BusEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT session closed");
                let _ = tx.send(BusEvent::Disconnected).await;
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                if tx.send(BusEvent::Error(e.to_string())).await.is_err()
                    || tx.send(BusEvent::Disconnected).await.is_err()
                {
                    break;
                }
                tokio::time::sleep(reconnect_period).await;
                continue;
            }
        };

        // keep polling without a receiver so a pending disconnect still goes out
        if tx.send(event).await.is_err() {
            trace!("Bus event receiver dropped");
        }
    }
}

fn restore_subscriptions(client: &AsyncClient, ledger: &Mutex<SubscriptionLedger>) {
    let filters = ledger.lock().filters();
    if filters.is_empty() {
        return;
    }
    debug!(count = filters.len(), "Restoring subscriptions");

    // queued from another task; this one has to keep polling
    let client = client.clone();
    tokio::spawn(async move {
        if let Err(e) = client.subscribe_many(filters).await {
            warn!("Failed to restore subscriptions: {}", e);
        }
    });
}

struct MqttClient {
    client: AsyncClient,
    ledger: Arc<Mutex<SubscriptionLedger>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BusClient for MqttClient {
    async fn subscribe(&self, topic: &str, level: u8) -> Result<()> {
        debug!(topic, "Subscribing");
        self.ledger.lock().record(topic, qos(level));
        self.client.subscribe(topic, qos(level)).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, level: u8, retain: bool) -> Result<()> {
        trace!(topic, size = payload.len(), retain, "Publishing");
        self.client.publish(topic, qos(level), retain, payload).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let task = self.task.lock().take();
        let Some(mut task) = task else {
            return Ok(());
        };

        if let Err(e) = self.client.disconnect().await {
            // event loop already gone
            debug!("MQTT disconnect request failed: {}", e);
            task.abort();
            return Ok(());
        }

        if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
            warn!("MQTT event loop did not close in time");
            task.abort();
        }
        Ok(())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
