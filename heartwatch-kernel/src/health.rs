use crate::dispatcher::AlertDispatcher;
use crate::registry::DeviceRegistry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorHealth {
    pub uptime_seconds: u64,
    pub devices_tracked: u32,
    pub devices_alerting: u32,
    pub alerts_dispatched: u64,
    pub alerts_in_flight: u32,
    pub decode_failures: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    decode_failures: Arc<AtomicU64>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            decode_failures: Arc::new(AtomicU64::new(0)),
            mqtt_status: Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, registry: &DeviceRegistry, dispatcher: &AlertDispatcher) -> MonitorHealth {
        MonitorHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices_tracked: registry.len() as u32,
            devices_alerting: registry.alerting_count() as u32,
            alerts_dispatched: dispatcher.dispatched(),
            alerts_in_flight: dispatcher.in_flight() as u32,
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Démarre le rapport périodique de santé dans les logs
    pub fn spawn_health_reporter(
        &self,
        registry: Arc<DeviceRegistry>,
        dispatcher: AlertDispatcher,
        every: Duration,
        cancel: CancellationToken,
    ) -> task::JoinHandle<()> {
        let health_tracker = self.clone();

        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // le premier tick est immédiat, on le saute
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {
                        let health = health_tracker.get_health(&registry, &dispatcher);
                        info!(
                            uptime_seconds = health.uptime_seconds,
                            devices = health.devices_tracked,
                            alerting = health.devices_alerting,
                            alerts = health.alerts_dispatched,
                            decode_failures = health.decode_failures,
                            mqtt = %health.mqtt_status,
                            "[health] monitor status"
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::dispatcher::DispatchSettings;

    #[tokio::test]
    async fn test_health_counters() {
        let tracker = HealthTracker::new();
        let registry = DeviceRegistry::new();
        let dispatcher = AlertDispatcher::new(Arc::new(StaticDirectory::default()), Vec::new(), DispatchSettings::default());

        registry.get_or_create("dev-1", tokio::time::Instant::now());
        tracker.record_decode_failure();
        tracker.increment_reconnects();

        let health = tracker.get_health(&registry, &dispatcher);
        assert_eq!(health.devices_tracked, 1);
        assert_eq!(health.devices_alerting, 0);
        assert_eq!(health.decode_failures, 1);
        assert_eq!(health.mqtt_reconnects, 1);
        assert_eq!(health.mqtt_status, "reconnecting");

        tracker.mark_mqtt_connected();
        assert_eq!(tracker.get_health(&registry, &dispatcher).mqtt_status, "connected");
    }
}
