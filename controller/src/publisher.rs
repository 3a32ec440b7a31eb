use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tracing::{info, warn};

use brewengine_common::{history_topic, log_topic, LogLine, Publisher, TelemetryRecord};

pub struct MqttPublisher {
    client: AsyncClient,
    history_topic: String,
    log_topic: String,
}

impl MqttPublisher {
    /// Connects only when `MQTT_HOST` is set.
    pub fn from_env(hostname: &str) -> Option<(Self, EventLoop)> {
        let host = std::env::var("MQTT_HOST").ok().filter(|host| !host.is_empty())?;
        let port = std::env::var("MQTT_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(1883);

        let mut options = MqttOptions::new(format!("brewengine-{hostname}"), host, port);
        let user = std::env::var("MQTT_USER").unwrap_or_default();
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        if !user.is_empty() {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let publisher = Self {
            client,
            history_topic: history_topic(hostname),
            log_topic: log_topic(hostname),
        };
        Some((publisher, eventloop))
    }

    fn publish_json<T: Serialize>(&self, topic: &str, value: &T) {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("telemetry serialization failed: {err}");
                return;
            }
        };

        if let Err(err) = self
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
        {
            warn!("publish to {topic} failed: {err}");
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish_record(&self, record: &TelemetryRecord) {
        self.publish_json(&self.history_topic, record);
    }

    fn publish_log(&self, line: &LogLine) {
        self.publish_json(&self.log_topic, line);
    }
}

pub fn spawn_mqtt_loop(mut eventloop: EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}
