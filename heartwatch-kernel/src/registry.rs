/**
 * DEVICE REGISTRY - État de santé par device
 *
 * RÔLE :
 * Source unique de vérité pour la liveness de la flotte. Une entrée par device
 * vu depuis le démarrage du process, jamais supprimée.
 *
 * FONCTIONNEMENT :
 * - Un seul mutex protège la map ET les entrées
 * - Le lock n'est jamais tenu pendant une notification ni à travers un `.await`
 * - Le processor passe par `update`, le sweeper par `escalate_if_silent`
 */

use crate::heartbeat::Fingerprint;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceHealth {
    pub device_id: String,
    /// Horloge monotone, base de tous les calculs d'inactivité
    pub last_heard_from: Instant,
    /// Même instant en heure murale, pour l'affichage uniquement
    pub last_heard_at: OffsetDateTime,
    pub last_sequence: u32,
    pub in_alert_state: bool,
    pub library_fingerprint: Fingerprint,
    pub firmware_fingerprint: Fingerprint,
    pub signal_strength: f32,
}

impl DeviceHealth {
    fn new(device_id: &str, now: Instant) -> Self {
        Self {
            device_id: device_id.to_string(),
            last_heard_from: now,
            last_heard_at: OffsetDateTime::now_utc(),
            last_sequence: 0,
            in_alert_state: false,
            library_fingerprint: Fingerprint::default(),
            firmware_fingerprint: Fingerprint::default(),
            signal_strength: 0.0,
        }
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heard_from)
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<BTreeMap<String, DeviceHealth>>,
}

pub type SharedRegistry = Arc<DeviceRegistry>;

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Self::new())
    }

    /// Retourne l'état existant ou insère un état vierge
    pub fn get_or_create(&self, device_id: &str, now: Instant) -> DeviceHealth {
        self.devices
            .lock()
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceHealth::new(device_id, now))
            .clone()
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceHealth> {
        self.devices.lock().get(device_id).cloned()
    }

    /// Copie ordonnée (par device id) de toute la map, pour itérer sans tenir le lock
    pub fn snapshot(&self) -> Vec<(String, DeviceHealth)> {
        self.devices
            .lock()
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    pub fn alerting_count(&self) -> usize {
        self.devices.lock().values().filter(|d| d.in_alert_state).count()
    }

    /// Exécute `f` sur l'état du device dans une seule section critique.
    /// Le booléen indique si le device existait avant cet appel.
    pub fn update<R>(
        &self,
        device_id: &str,
        now: Instant,
        f: impl FnOnce(&mut DeviceHealth, bool) -> R,
    ) -> R {
        let mut devices = self.devices.lock();
        let existed = devices.contains_key(device_id);
        let state = devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceHealth::new(device_id, now));
        f(state, existed)
    }

    /// Passe le device en alerte si, sous le lock, il est toujours silencieux
    /// depuis au moins `timeout` et pas déjà en alerte. Retourne l'état escaladé.
    pub fn escalate_if_silent(
        &self,
        device_id: &str,
        now: Instant,
        timeout: Duration,
    ) -> Option<DeviceHealth> {
        let mut devices = self.devices.lock();
        let state = devices.get_mut(device_id)?;
        if state.in_alert_state || state.silent_for(now) < timeout {
            return None;
        }
        state.in_alert_state = true;
        Some(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_or_create_is_idempotent() {
        let registry = DeviceRegistry::new();
        let t0 = Instant::now();
        let first = registry.get_or_create("dev-a", t0);
        assert_eq!(first.last_sequence, 0);
        assert!(!first.in_alert_state);

        tokio::time::advance(Duration::from_secs(3)).await;
        let again = registry.get_or_create("dev-a", Instant::now());
        assert_eq!(again.last_heard_from, t0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered() {
        let registry = DeviceRegistry::new();
        let now = Instant::now();
        for id in ["c", "a", "b"] {
            registry.get_or_create(id, now);
        }
        let ids: Vec<String> = registry.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_update_reports_existence() {
        let registry = DeviceRegistry::new();
        let now = Instant::now();
        assert!(!registry.update("dev", now, |_, existed| existed));
        assert!(registry.update("dev", now, |_, existed| existed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalate_only_once_and_only_when_silent() {
        let registry = DeviceRegistry::new();
        let timeout = Duration::from_secs(30);
        registry.get_or_create("dev", Instant::now());

        tokio::time::advance(Duration::from_millis(29_900)).await;
        assert!(registry.escalate_if_silent("dev", Instant::now(), timeout).is_none());

        tokio::time::advance(Duration::from_millis(200)).await;
        let escalated = registry.escalate_if_silent("dev", Instant::now(), timeout).unwrap();
        assert!(escalated.in_alert_state);
        assert!(registry.escalate_if_silent("dev", Instant::now(), timeout).is_none());
        assert_eq!(registry.alerting_count(), 1);

        assert!(registry.escalate_if_silent("unknown", Instant::now(), timeout).is_none());
    }
}
