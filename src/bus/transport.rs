//! Broker transport.
//!
//! `BusTransport` is the seam between the supervisor's state machine and the
//! MQTT client library. `MqttTransport` drives a rumqttc client/event loop
//! pair; a fresh pair is built on every `connect` so a reconnect never
//! inherits requests queued against the previous link.

use async_trait::async_trait;
use log::{debug, trace, warn};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::time::timeout;

use super::topics::{Publication, Topics, LIVENESS_QOS, STATUS_WILL};
use crate::config::Config;
use crate::utils::error::BusError;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait BusTransport: Send {
    /// Performs the connect handshake, returning once the broker accepted it.
    async fn connect(&mut self) -> Result<(), BusError>;

    /// Services the link for at most `timeout`. `Ok(None)` means nothing of
    /// interest happened; an error means the link is gone.
    async fn tick(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, BusError>;

    async fn publish(&mut self, publication: &Publication) -> Result<(), BusError>;

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BusError>;

    async fn disconnect(&mut self) -> Result<(), BusError>;
}

/// Connection parameters that stay the same across reconnects.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub will_topic: String,
    pub capacity: usize,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.client_name.clone(),
            host: config.mqtt.host.clone(),
            port: config.mqtt.port,
            keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
            will_topic: Topics::from_config(&config.mqtt).status(),
            capacity: config.mqtt.request_capacity,
        }
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        // Persistent session: subscriptions and queued QoS>0 traffic survive reconnects
        options.set_clean_session(false);
        options.set_last_will(LastWill::new(&self.will_topic, STATUS_WILL, LIVENESS_QOS, true));
        options
    }
}

struct Link {
    client: AsyncClient,
    event_loop: EventLoop,
}

pub struct MqttTransport {
    session: SessionOptions,
    link: Option<Link>,
}

impl MqttTransport {
    pub fn new(session: SessionOptions) -> Self {
        Self { session, link: None }
    }

    fn link(&mut self) -> Result<&mut Link, BusError> {
        self.link
            .as_mut()
            .ok_or_else(|| BusError::Link("not connected".to_string()))
    }
}

#[async_trait]
impl BusTransport for MqttTransport {
    async fn connect(&mut self) -> Result<(), BusError> {
        self.link = None;
        let (client, mut event_loop) = AsyncClient::new(self.session.mqtt_options(), self.session.capacity);
        let handshake_timeout = self.session.keep_alive;

        loop {
            let event = timeout(handshake_timeout, event_loop.poll())
                .await
                .map_err(|_| BusError::Connect("handshake timed out".to_string()))?
                .map_err(|e| BusError::Connect(e.to_string()))?;

            match event {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(BusError::Connect(format!("broker refused connection: {:?}", ack.code)));
                    }
                    debug!("CONNACK received (session present: {})", ack.session_present);
                    self.link = Some(Link { client, event_loop });
                    return Ok(());
                }
                other => trace!("Handshake event: {:?}", other),
            }
        }
    }

    async fn tick(&mut self, tick_timeout: Duration) -> Result<Option<InboundMessage>, BusError> {
        let link = self.link()?;

        match timeout(tick_timeout, link.event_loop.poll()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => Ok(Some(InboundMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            })),
            Ok(Ok(Event::Incoming(Packet::Disconnect))) => Err(BusError::Link("disconnected by broker".to_string())),
            Ok(Ok(event)) => {
                trace!("Bus event: {:?}", event);
                Ok(None)
            }
        }
    }

    async fn publish(&mut self, publication: &Publication) -> Result<(), BusError> {
        let link = self.link()?;
        link.client.try_publish(
            publication.topic.as_str(),
            publication.qos,
            publication.retain,
            publication.payload.as_bytes().to_vec(),
        )?;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BusError> {
        let link = self.link()?;
        link.client.try_subscribe(topic, qos)?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BusError> {
        let Some(mut link) = self.link.take() else {
            return Ok(());
        };

        link.client.try_disconnect()?;

        // Drive the event loop until the DISCONNECT has gone out, so anything
        // queued before it (e.g. an offline status) reaches the broker.
        let flush = async {
            loop {
                match link.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Event loop closed while flushing: {}", e);
                        break;
                    }
                }
            }
        };
        if timeout(FLUSH_TIMEOUT, flush).await.is_err() {
            warn!("Timed out flushing outgoing packets before disconnect");
        }
        Ok(())
    }
}
