use rumqttc::QoS;

use crate::config::MqttConfig;
use crate::devices::Reading;

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";
pub const STATUS_WILL: &str = "disconnected";
pub const PING_REQUEST: &str = "request";
pub const PING_RESPONSE: &str = "response";

pub const LIVENESS_QOS: QoS = QoS::AtLeastOnce;
pub const TELEMETRY_QOS: QoS = QoS::ExactlyOnce;
pub const PING_SUBSCRIBE_QOS: QoS = QoS::ExactlyOnce;

/// One message to hand to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl Publication {
    pub fn new(topic: String, payload: impl Into<String>, qos: QoS, retain: bool) -> Self {
        Self {
            topic,
            payload: payload.into(),
            qos,
            retain,
        }
    }
}

/// Topic layout: liveness records live under the client prefix, telemetry
/// under the base prefix. Both prefixes end in `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    client_topic: String,
    base_topic: String,
}

impl Topics {
    pub fn new(client_topic: &str, base_topic: &str) -> Self {
        Self {
            client_topic: client_topic.to_string(),
            base_topic: base_topic.to_string(),
        }
    }

    pub fn from_config(config: &MqttConfig) -> Self {
        Self::new(&config.client_topic, &config.base_topic)
    }

    pub fn client(&self, suffix: &str) -> String {
        format!("{}{}", self.client_topic, suffix)
    }

    pub fn telemetry(&self, suffix: &str) -> String {
        format!("{}{}", self.base_topic, suffix)
    }

    pub fn status(&self) -> String {
        self.client("status")
    }

    pub fn ping(&self) -> String {
        self.client("ping")
    }

    pub fn status_publication(&self, status: &str) -> Publication {
        Publication::new(self.status(), status, LIVENESS_QOS, true)
    }

    pub fn ping_response(&self) -> Publication {
        Publication::new(self.ping(), PING_RESPONSE, LIVENESS_QOS, false)
    }

    /// Everything published for one reading, in publication order. Fields
    /// the device did not send are left out; channels stop at the first gap.
    pub fn reading_publications(&self, reading: &Reading) -> Vec<Publication> {
        let telemetry = |suffix: &str, payload: String| {
            Publication::new(self.telemetry(suffix), payload, TELEMETRY_QOS, true)
        };

        let mut publications = vec![telemetry("xml", reading.raw_message.clone())];

        let fields = [
            ("version", reading.device_version.clone()),
            ("sensor_num", reading.sensor_num.map(|n| n.to_string())),
            ("radio_id", reading.radio_id.clone()),
            ("poll_time", reading.poll_time.clone()),
            ("temperature", reading.temperature.clone()),
        ];
        publications.extend(
            fields
                .into_iter()
                .filter_map(|(suffix, value)| value.map(|value| telemetry(suffix, value))),
        );

        let channels = reading.channels.contiguous_watts();
        for (index, watts) in &channels {
            publications.push(telemetry(&format!("channel-{}", index), watts.to_string()));
        }
        publications.push(telemetry("number-channels", channels.len().to_string()));

        publications
    }
}
