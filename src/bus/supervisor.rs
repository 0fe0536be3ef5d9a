//! Broker connection lifecycle.
//!
//! The supervisor owns the transport and the [`ConnectionState`]. It
//! connects with a fixed backoff, announces liveness on every successful
//! handshake, answers ping requests, and walks the link through
//! `Connected -> Disconnected -> Connecting` when a tick fails.

use log::{debug, error, info, trace, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::identity::ClientIdentity;
use super::state::ConnectionState;
use super::topics::{Publication, Topics, PING_REQUEST, PING_SUBSCRIBE_QOS, STATUS_OFFLINE};
use super::transport::{BusTransport, InboundMessage};
use crate::config::Config;
use crate::devices::Reading;
use crate::utils::error::BusError;

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub host: String,
    pub port: u16,
    pub tick: Duration,
    pub reconnect_backoff: Duration,
    pub quiescence: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.mqtt.host.clone(),
            port: config.mqtt.port,
            tick: config.timing.tick(),
            reconnect_backoff: config.timing.reconnect_backoff(),
            quiescence: config.timing.quiescence(),
        }
    }
}

pub struct BusSupervisor<T: BusTransport> {
    transport: T,
    topics: Topics,
    settings: SupervisorSettings,
    state_tx: watch::Sender<ConnectionState>,
}

impl<T: BusTransport> BusSupervisor<T> {
    pub fn new(transport: T, topics: Topics, settings: SupervisorSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            topics,
            settings,
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receivers always see the latest state; only the supervisor writes it.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("Connection state changed: {} -> {}", previous, state);
        }
    }

    /// Connects, retrying every `reconnect_backoff` until the broker accepts
    /// us. Only cancellation ends the loop without a connection.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), BusError> {
        self.set_state(ConnectionState::Connecting);
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            info!(
                "🔌 Attempting connection to {}:{} (attempt {})",
                self.settings.host, self.settings.port, attempt
            );

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.transport.connect() => Some(result),
            };

            match outcome {
                None => return self.abandon_connect(),
                Some(Ok(())) => {
                    self.on_connected().await;
                    return Ok(());
                }
                Some(Err(e)) => {
                    error!(
                        "❌ Connection failed: {}. Retrying in {} seconds.",
                        e,
                        self.settings.reconnect_backoff.as_secs()
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return self.abandon_connect(),
                _ = tokio::time::sleep(self.settings.reconnect_backoff) => {}
            }
        }
    }

    fn abandon_connect(&self) -> Result<(), BusError> {
        info!("Connection attempts cancelled");
        self.set_state(ConnectionState::Disconnected);
        Err(BusError::Cancelled)
    }

    async fn on_connected(&mut self) {
        self.set_state(ConnectionState::Connected);
        info!("✅ MQTT connected");

        let identity = ClientIdentity::discover(&self.settings.host, self.settings.port).await;
        for publication in identity.publications(&self.topics) {
            self.publish_best_effort(&publication).await;
        }

        let ping_topic = self.topics.ping();
        if let Err(e) = self.transport.subscribe(&ping_topic, PING_SUBSCRIBE_QOS).await {
            warn!("Failed to subscribe to {}: {}", ping_topic, e);
        }
    }

    async fn publish_best_effort(&mut self, publication: &Publication) {
        if let Err(e) = self.transport.publish(publication).await {
            warn!("Failed to publish {}: {}", publication.topic, e);
        }
    }

    /// Services the link once. An error means the link is gone and the
    /// caller should run [`recover`](Self::recover).
    pub async fn tick(&mut self) -> Result<(), BusError> {
        if let Some(message) = self.transport.tick(self.settings.tick).await? {
            self.handle_message(message).await;
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        if message.topic == self.topics.ping() && message.payload == PING_REQUEST.as_bytes() {
            debug!("Ping request received, responding");
            let response = self.topics.ping_response();
            self.publish_best_effort(&response).await;
        } else {
            trace!("Ignoring message on {}", message.topic);
        }
    }

    /// `Connected -> Disconnected -> Connecting` after a failed tick.
    pub async fn recover(&mut self, cause: BusError, cancel: &CancellationToken) -> Result<(), BusError> {
        warn!("⚠️  Bus link lost: {}", cause);
        self.teardown().await;

        info!(
            "Stalling for {} seconds to allow broker connection to time out.",
            self.settings.quiescence.as_secs()
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(BusError::Cancelled),
            _ = tokio::time::sleep(self.settings.quiescence) => {}
        }

        self.connect(cancel).await
    }

    pub async fn disconnect(&mut self) {
        info!("Disconnecting...");
        self.teardown().await;
        info!("MQTT Disconnected");
    }

    async fn teardown(&mut self) {
        if self.state().is_connected() {
            let offline = self.topics.status_publication(STATUS_OFFLINE);
            self.publish_best_effort(&offline).await;
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("Error while disconnecting: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Publishes every field of `reading`; returns how many messages went out.
    pub async fn publish_reading(&mut self, reading: &Reading) -> Result<usize, BusError> {
        if !self.state().is_connected() {
            return Err(BusError::Link("not connected".to_string()));
        }

        let publications = self.topics.reading_publications(reading);
        for publication in &publications {
            self.transport.publish(publication).await?;
        }
        Ok(publications.len())
    }
}
