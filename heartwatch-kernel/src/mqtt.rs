//! Adaptateur de transport : abonnement MQTT au stream d'un groupe de devices.
//!
//! Topic : `<prefix>/<group_id>/<device_id>/messages`. L'identité de l'émetteur
//! vient du topic, le payload est décodé par `heartbeat::decode`. Les messages
//! d'un groupe sont traités strictement dans l'ordre d'arrivée.

use crate::config::MonitorConfig;
use crate::health::HealthTracker;
use crate::heartbeat::{self, DeviceMessage};
use crate::processor::{HeartbeatProcessor, Processed};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("subscribe failed: {0}")]
    Subscribe(#[from] rumqttc::ClientError),
    #[error("stream closed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

#[derive(Debug, Clone)]
pub struct GroupTopics {
    prefix: String,
    group_id: String,
}

impl GroupTopics {
    pub fn new(prefix: &str, group_id: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            group_id: group_id.to_string(),
        }
    }

    /// Filtre d'abonnement couvrant tous les devices du groupe
    pub fn filter(&self) -> String {
        format!("{}/{}/+/messages", self.prefix, self.group_id)
    }

    pub fn device_topic(&self, device_id: &str) -> String {
        format!("{}/{}/{}/messages", self.prefix, self.group_id, device_id)
    }

    /// Extrait le device id d'un topic du groupe, `None` si le topic ne correspond pas
    pub fn device_id<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_prefix(self.group_id.as_str())?
            .strip_prefix('/')?;
        let device_id = rest.strip_suffix("/messages")?;
        if device_id.is_empty() || device_id.contains('/') {
            return None;
        }
        Some(device_id)
    }
}

#[derive(Debug)]
pub enum Disposition {
    Heartbeat(Processed),
    /// Topic hors groupe ou type de message non surveillé
    Ignored,
    /// Payload illisible, message abandonné
    Dropped,
}

pub fn handle_publish(
    topics: &GroupTopics,
    processor: &HeartbeatProcessor,
    health: &HealthTracker,
    topic: &str,
    payload: &[u8],
) -> Disposition {
    let Some(device_id) = topics.device_id(topic) else {
        debug!("[mqtt] ignoring message on unexpected topic {topic}");
        return Disposition::Ignored;
    };

    match heartbeat::decode(payload) {
        Ok(DeviceMessage::Ping(hb)) => Disposition::Heartbeat(processor.process(device_id, &hb)),
        Ok(DeviceMessage::Other) => {
            debug!(device_id, "[mqtt] non-heartbeat message ignored");
            Disposition::Ignored
        }
        Err(e) => {
            health.record_decode_failure();
            warn!(device_id, "[mqtt] dropping undecodable message: {e}");
            Disposition::Dropped
        }
    }
}

/// Boucle de réception bloquante. Retourne `Ok` sur annulation, `Err` quand le
/// stream tombe (l'appelant doit relancer).
pub async fn receive_device_messages(
    cfg: &MonitorConfig,
    processor: &HeartbeatProcessor,
    health: &HealthTracker,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let topics = GroupTopics::new(&cfg.mqtt.topic_prefix, &cfg.group_id);

    let mut opts = MqttOptions::new(cfg.mqtt.client_id.clone(), cfg.mqtt.host.clone(), cfg.mqtt.port);
    opts.set_keep_alive(cfg.mqtt.keep_alive);
    let (client, mut eventloop) = AsyncClient::new(opts, 10);

    client.subscribe(topics.filter(), QoS::AtLeastOnce).await?;
    info!("[mqtt] subscribed to {} on {}:{}", topics.filter(), cfg.mqtt.host, cfg.mqtt.port);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = client.disconnect().await {
                    debug!("[mqtt] disconnect on shutdown failed: {e}");
                }
                return Ok(());
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("[mqtt] connected");
                    health.mark_mqtt_connected();
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    handle_publish(&topics, processor, health, &p.topic, &p.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    health.mark_mqtt_disconnected();
                    return Err(TransportError::Connection(e));
                }
            }
        }
    }
}

/// Relance la boucle de réception après chaque coupure, jusqu'à annulation
pub async fn run_receive_loop(
    cfg: MonitorConfig,
    processor: HeartbeatProcessor,
    health: HealthTracker,
    cancel: CancellationToken,
) {
    let delay: Duration = cfg.reconnect_delay;
    loop {
        match receive_device_messages(&cfg, &processor, &health, &cancel).await {
            Ok(()) => {
                info!("[mqtt] receive loop stopped");
                return;
            }
            Err(e) => {
                error!("[mqtt] {e}, retrying in {}", humantime::format_duration(delay));
                health.increment_reconnects();
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
