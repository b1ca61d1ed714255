/*!
heartbeat-sim : publie les heartbeats d'une flotte virtuelle sur le broker

Configuration par variables d'environnement :
- SIM_MQTT_HOST / SIM_MQTT_PORT   (localhost:1883)
- SIM_TOPIC_PREFIX                (heartwatch/groups)
- SIM_GROUP_ID                    (default)
- SIM_DEVICES                     (3)
- SIM_PERIOD                      (10s, format humantime)
- SIM_BEHAVIOURS                  ex. "steady,skip:10,silent:20"
*/

use anyhow::Context;
use heartwatch_devkit::{FleetSimulator, SimBehaviour};
use heartwatch_kernel::mqtt::GroupTopics;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let host = env_or("SIM_MQTT_HOST", "localhost");
    let port: u16 = env_or("SIM_MQTT_PORT", "1883").parse().context("SIM_MQTT_PORT")?;
    let topics = GroupTopics::new(&env_or("SIM_TOPIC_PREFIX", "heartwatch/groups"), &env_or("SIM_GROUP_ID", "default"));
    let count: usize = env_or("SIM_DEVICES", "3").parse().context("SIM_DEVICES")?;
    let period = humantime::parse_duration(&env_or("SIM_PERIOD", "10s")).context("SIM_PERIOD")?;
    let behaviours = env_or("SIM_BEHAVIOURS", "")
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<SimBehaviour>().map_err(anyhow::Error::msg))
        .collect::<anyhow::Result<Vec<_>>>()
        .context("SIM_BEHAVIOURS")?;

    let mut sim = FleetSimulator::new(count, &behaviours);

    // MQTT async
    let mut opts = MqttOptions::new("heartbeat-sim", host.as_str(), port);
    opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(opts, 100);

    // Boucle d'événements MQTT (acks, reconnexion)
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!("[sim] MQTT loop error: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    info!(
        "[sim] {} devices on {}:{} every {} ({:?})",
        count,
        host,
        port,
        humantime::format_duration(period),
        sim.device_ids()
    );

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[sim] stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                for (device_id, ping) in sim.tick() {
                    let topic = topics.device_topic(&device_id);
                    if let Err(e) = client.publish(topic, QoS::AtMostOnce, false, ping.to_bytes()).await {
                        error!("[sim] publish for {device_id} failed: {e}");
                    }
                }
            }
        }
    }
}
