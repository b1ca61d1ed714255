/**
 * INACTIVITY SWEEPER - Détection des devices silencieux
 *
 * RÔLE :
 * Toutes les `period` (5s par défaut), parcourt un snapshot du registre et
 * escalade chaque device silencieux depuis au moins `timeout`.
 *
 * GARANTIE :
 * Au plus UNE alerte d'inactivité par épisode de silence. Le check-then-set est
 * refait sous le lock (`escalate_if_silent`) : un heartbeat arrivé entre le
 * snapshot et l'escalade annule l'alerte.
 */

use crate::dispatcher::{Alert, AlertDispatcher, AlertKind, DispatchReport};
use crate::registry::{DeviceHealth, SharedRegistry};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Clone)]
pub struct InactivitySweeper {
    registry: SharedRegistry,
    dispatcher: AlertDispatcher,
    timeout: Duration,
    period: Duration,
}

impl InactivitySweeper {
    pub fn new(
        registry: SharedRegistry,
        dispatcher: AlertDispatcher,
        timeout: Duration,
        period: Duration,
    ) -> Self {
        Self { registry, dispatcher, timeout, period }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Un passage complet avec un seul `now`. Retourne les alertes levées.
    pub fn sweep_once(&self, now: Instant) -> Vec<JoinHandle<DispatchReport>> {
        let mut raised = Vec::new();
        for (device_id, state) in self.registry.snapshot() {
            if state.in_alert_state || state.silent_for(now) < self.timeout {
                continue;
            }
            // re-vérifié sous le lock : un heartbeat a pu arriver depuis le snapshot
            let Some(escalated) = self.registry.escalate_if_silent(&device_id, now, self.timeout) else {
                debug!(device_id, "[sweeper] heartbeat arrived during sweep, not escalated");
                continue;
            };
            raised.push(self.dispatcher.alert(inactivity_alert(&escalated, self.timeout)));
        }
        raised
    }

    /// Boucle périodique jusqu'à annulation
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "[sweeper] started (timeout {}, period {})",
            humantime::format_duration(self.timeout),
            humantime::format_duration(self.period)
        );
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[sweeper] stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let raised = self.sweep_once(Instant::now());
                    if !raised.is_empty() {
                        info!("[sweeper] escalated {} silent devices", raised.len());
                    }
                }
            }
        }
    }
}

pub fn inactivity_alert(state: &DeviceHealth, timeout: Duration) -> Alert {
    Alert {
        device_id: state.device_id.clone(),
        kind: AlertKind::Inactivity,
        subject: format!("not heard from for {}", humantime::format_duration(timeout)),
        body: format!(
            "Device info for last message from device:\n\
             RSSI: {} dBm\n\
             Library fingerprint: {}\n\
             Firmware fingerprint: {}\n",
            state.signal_strength, state.library_fingerprint, state.firmware_fingerprint
        ),
    }
}
