/*!
# Heartwatch DevKit - Doubles de test et outils de développement

Bibliothèque facilitant le test du moniteur sans broker ni relais SMTP :
- Canaux de notification et annuaire simulés (enregistrent tout, peuvent échouer)
- Builders de payloads heartbeat conformes au format wire
- Harness câblant registre + processor + sweeper + dispatcher réels
- Simulateur de flotte (binaire `heartbeat-sim`)
*/

pub mod mocks;
pub mod payloads;
pub mod sim;
pub mod test_utils;

pub use mocks::{MockDirectory, MockNotifier};
pub use payloads::PingBuilder;
pub use sim::{FleetSimulator, SimBehaviour};
pub use test_utils::{collect_reports, HarnessOptions, TestHarness};
