/**
 * HEARTBEAT PROCESSOR - Application d'un heartbeat au registre
 *
 * RÔLE :
 * Met à jour la liveness du device, classe la séquence reçue, détecte les
 * changements de version et lève l'alerte de trou de séquence.
 *
 * FONCTIONNEMENT :
 * - une seule section critique : existence, reset alerte, horodatage, classement, stockage
 * - logs et dispatch APRÈS relâchement du lock
 * - premier heartbeat d'un device : jamais d'alerte (rien à comparer)
 * - séquence attendue = dernière + 1 (wrapping) ; plus petite = redémarrage, pas d'alerte
 */

use crate::dispatcher::{Alert, AlertDispatcher, AlertKind, DispatchReport};
use crate::heartbeat::{Fingerprint, Heartbeat};
use crate::registry::SharedRegistry;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Premier heartbeat du device depuis le démarrage
    First,
    InOrder,
    /// Séquence plus petite que la précédente : le device a redémarré
    Restarted { previous: u32, current: u32 },
    /// Au moins un message perdu en transit
    Gap { expected: u32, got: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionChange {
    Library { from: Fingerprint, to: Fingerprint },
    Firmware { from: Fingerprint, to: Fingerprint },
}

#[derive(Debug)]
pub struct Processed {
    pub sequence: SequenceCheck,
    pub version_changes: Vec<VersionChange>,
    /// Présent quand une alerte de trou de séquence a été levée
    pub alert: Option<JoinHandle<DispatchReport>>,
}

pub fn classify_sequence(previous: u32, current: u32) -> SequenceCheck {
    let expected = previous.wrapping_add(1);
    if current == expected {
        SequenceCheck::InOrder
    } else if current < previous {
        SequenceCheck::Restarted { previous, current }
    } else {
        SequenceCheck::Gap { expected, got: current }
    }
}

#[derive(Clone)]
pub struct HeartbeatProcessor {
    registry: SharedRegistry,
    dispatcher: AlertDispatcher,
}

impl HeartbeatProcessor {
    pub fn new(registry: SharedRegistry, dispatcher: AlertDispatcher) -> Self {
        Self { registry, dispatcher }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn process(&self, device_id: &str, hb: &Heartbeat) -> Processed {
        let now = Instant::now();
        debug!(device_id, sequence = hb.sequence, rssi = hb.signal_strength, "[processor] heartbeat received");

        let (sequence, version_changes) = self.registry.update(device_id, now, |state, existed| {
            state.in_alert_state = false;
            state.last_heard_from = now;
            state.last_heard_at = OffsetDateTime::now_utc();

            let mut changes = Vec::new();
            let check = if existed {
                if hb.library_fingerprint != state.library_fingerprint {
                    changes.push(VersionChange::Library {
                        from: state.library_fingerprint,
                        to: hb.library_fingerprint,
                    });
                }
                if hb.firmware_fingerprint != state.firmware_fingerprint {
                    changes.push(VersionChange::Firmware {
                        from: state.firmware_fingerprint,
                        to: hb.firmware_fingerprint,
                    });
                }
                classify_sequence(state.last_sequence, hb.sequence)
            } else {
                SequenceCheck::First
            };

            state.last_sequence = hb.sequence;
            state.signal_strength = hb.signal_strength;
            state.library_fingerprint = hb.library_fingerprint;
            state.firmware_fingerprint = hb.firmware_fingerprint;
            (check, changes)
        });

        for change in &version_changes {
            match change {
                VersionChange::Library { from, to } => {
                    info!(device_id, %from, %to, "[processor] new library version detected")
                }
                VersionChange::Firmware { from, to } => {
                    info!(device_id, %from, %to, "[processor] new firmware version detected")
                }
            }
        }

        let alert = match sequence {
            SequenceCheck::First => {
                info!(device_id, sequence = hb.sequence, "[processor] first heartbeat from device");
                None
            }
            SequenceCheck::InOrder => None,
            SequenceCheck::Restarted { previous, current } => {
                info!(
                    device_id,
                    "[processor] got sequence number {current} smaller than previous {previous}, device restarted?"
                );
                None
            }
            SequenceCheck::Gap { expected, got } => Some(self.dispatcher.alert(Alert {
                device_id: device_id.to_string(),
                kind: AlertKind::SequenceGap,
                subject: format!("Expected sequence number {expected} but got {got}"),
                body: String::new(),
            })),
        };

        Processed { sequence, version_changes, alert }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::dispatcher::DispatchSettings;
    use crate::registry::DeviceRegistry;
    use std::sync::Arc;

    #[test]
    fn test_classify_sequence() {
        assert_eq!(classify_sequence(6, 7), SequenceCheck::InOrder);
        assert_eq!(classify_sequence(6, 9), SequenceCheck::Gap { expected: 7, got: 9 });
        assert_eq!(classify_sequence(6, 3), SequenceCheck::Restarted { previous: 6, current: 3 });
        // doublon : même séquence, compté comme un trou (rien de perdu mais hors ordre)
        assert_eq!(classify_sequence(6, 6), SequenceCheck::Gap { expected: 7, got: 6 });
    }

    #[test]
    fn test_classify_sequence_wraparound() {
        assert_eq!(classify_sequence(u32::MAX, 0), SequenceCheck::InOrder);
        assert_eq!(
            classify_sequence(u32::MAX, 5),
            SequenceCheck::Restarted { previous: u32::MAX, current: 5 }
        );
        assert_eq!(classify_sequence(u32::MAX - 1, u32::MAX), SequenceCheck::InOrder);
    }

    fn processor() -> HeartbeatProcessor {
        let directory = Arc::new(StaticDirectory::default());
        let dispatcher = AlertDispatcher::new(directory, Vec::new(), DispatchSettings::default());
        HeartbeatProcessor::new(DeviceRegistry::shared(), dispatcher)
    }

    fn ping(sequence: u32, library: u32, firmware: u32) -> Heartbeat {
        Heartbeat {
            sequence,
            signal_strength: -70.0,
            library_fingerprint: Fingerprint(library),
            firmware_fingerprint: Fingerprint(firmware),
        }
    }

    #[tokio::test]
    async fn test_version_changes() {
        let processor = processor();

        let first = processor.process("dev-1", &ping(1, 0xaaaa, 0x1111));
        assert_eq!(first.sequence, SequenceCheck::First);
        assert!(first.version_changes.is_empty());

        let same = processor.process("dev-1", &ping(2, 0xaaaa, 0x1111));
        assert!(same.version_changes.is_empty());

        let updated = processor.process("dev-1", &ping(3, 0xbbbb, 0x2222));
        assert_eq!(updated.sequence, SequenceCheck::InOrder);
        assert_eq!(
            updated.version_changes,
            vec![
                VersionChange::Library { from: Fingerprint(0xaaaa), to: Fingerprint(0xbbbb) },
                VersionChange::Firmware { from: Fingerprint(0x1111), to: Fingerprint(0x2222) },
            ]
        );
        assert!(updated.alert.is_none());

        let firmware_only = processor.process("dev-1", &ping(4, 0xbbbb, 0x3333));
        assert_eq!(
            firmware_only.version_changes,
            vec![VersionChange::Firmware { from: Fingerprint(0x2222), to: Fingerprint(0x3333) }]
        );
        assert_eq!(processor.registry().get("dev-1").unwrap().firmware_fingerprint, Fingerprint(0x3333));
    }
}
