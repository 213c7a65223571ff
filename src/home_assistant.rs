//! Home Assistant binary sensor over MQTT
//!
//! Publishes an MQTT discovery document once connected, then a retained
//! `{"state": "ON" | "OFF"}` message for every state change.

use crate::config::HomeAssistantConfig;
use crate::notifier::{Notifier, NotifierError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Capacity of the client request queue
const REQUEST_CAPACITY: usize = 16;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// First delay between handshake attempts; doubles per attempt
const HANDSHAKE_BACKOFF: Duration = Duration::from_secs(1);

const MAX_HANDSHAKE_BACKOFF: Duration = Duration::from_secs(30);

/// Pause after a connection error before the event loop reconnects
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Topic carrying the sensor state
pub fn state_topic(device_id: &str) -> String {
    format!("homeassistant/binary_sensor/{}/state", device_id)
}

/// Topic carrying the discovery document
pub fn config_topic(device_id: &str) -> String {
    format!("homeassistant/binary_sensor/{}/config", device_id)
}

/// Discovery document announcing the sensor to Home Assistant
pub fn discovery_payload(config: &HomeAssistantConfig) -> Value {
    json!({
        "name": config.device_id,
        "unique_id": config.device_id,
        "device": {
            "name": config.device_name,
            "identifiers": [config.device_id],
        },
        "manufacturer": env!("CARGO_PKG_AUTHORS"),
        "model": env!("CARGO_PKG_NAME"),
        "sw_version": env!("CARGO_PKG_VERSION"),
        "device_class": "sound",
        "state_topic": state_topic(&config.device_id),
        "value_template": "{{ value_json.state }}",
    })
}

pub fn state_payload(state: bool) -> Value {
    json!({ "state": if state { "ON" } else { "OFF" } })
}

fn qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Notifier publishing to a Home Assistant MQTT broker
pub struct HomeAssistantNotifier {
    client: AsyncClient,
    config: HomeAssistantConfig,
    qos: QoS,
    event_loop: JoinHandle<()>,
}

impl HomeAssistantNotifier {
    /// Connect to the broker and announce the sensor.
    ///
    /// Waits for the CONNACK at most `connect_timeout` per attempt and retries
    /// `connect_retries` times with exponential backoff.
    pub async fn connect(config: HomeAssistantConfig) -> Result<Self, NotifierError> {
        let mut options =
            MqttOptions::new(&config.mqtt_client_id, &config.mqtt_host, config.mqtt_port);
        options.set_keep_alive(KEEP_ALIVE);
        if let (Some(user), Some(pass)) = (&config.mqtt_user, &config.mqtt_pass) {
            options.set_credentials(user, pass);
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        info!(
            "Connecting to MQTT broker {}:{}",
            config.mqtt_host, config.mqtt_port
        );
        wait_for_connection(&mut event_loop, &config).await?;

        let notifier = Self {
            client,
            qos: qos(config.mqtt_qos),
            event_loop: tokio::spawn(poll_events(event_loop)),
            config,
        };
        notifier.send_discovery().await?;

        Ok(notifier)
    }

    async fn send_discovery(&self) -> Result<(), NotifierError> {
        let payload = serde_json::to_string(&discovery_payload(&self.config))?;
        self.client
            .publish(config_topic(&self.config.device_id), self.qos, true, payload.clone())
            .await?;

        info!("Notified device config: {}", payload);
        Ok(())
    }
}

#[async_trait]
impl Notifier for HomeAssistantNotifier {
    async fn notify(&self, state: bool) -> Result<(), NotifierError> {
        let payload = serde_json::to_string(&state_payload(state))?;
        self.client
            .publish(state_topic(&self.config.device_id), self.qos, true, payload.clone())
            .await?;

        info!("Notified state changed: {}", payload);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "ha"
    }
}

impl Drop for HomeAssistantNotifier {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Drive the event loop until the broker accepts the connection
async fn wait_for_connection(
    event_loop: &mut EventLoop,
    config: &HomeAssistantConfig,
) -> Result<(), NotifierError> {
    let attempts = config.connect_retries.saturating_add(1);
    let mut backoff = HANDSHAKE_BACKOFF;

    for attempt in 1..=attempts {
        let reason = match timeout(config.connect_timeout, handshake(event_loop)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no CONNACK within {:?}", config.connect_timeout),
        };

        if attempt == attempts {
            return Err(NotifierError::Handshake(format!(
                "{}:{} after {} attempt(s): {}",
                config.mqtt_host, config.mqtt_port, attempts, reason
            )));
        }

        warn!(
            "MQTT connection attempt {}/{} failed: {}. Retrying in {:?}",
            attempt, attempts, reason, backoff
        );
        sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_HANDSHAKE_BACKOFF);
    }

    Err(NotifierError::Handshake("no connection attempt made".to_string()))
}

async fn handshake(event_loop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = event_loop.poll().await? {
            debug!("MQTT client connected: {:?}", ack);
            return Ok(());
        }
    }
}

/// Keep the connection alive and flush outgoing publishes
async fn poll_events(mut event_loop: EventLoop) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!("MQTT PUBACK received for message {}", ack.pkid);
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("MQTT client reconnected: {:?}", ack);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                debug!("MQTT client disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
