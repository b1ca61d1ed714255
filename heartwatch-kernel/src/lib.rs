//! Heartwatch kernel : surveillance de liveness d'une flotte de devices IoT.
//!
//! Le coeur est la machine d'état de santé par device (`registry`), le
//! classement des heartbeats (`processor`), le balayage d'inactivité
//! (`sweeper`) et le fan-out dédupliqué des alertes (`dispatcher`).
//! Transport MQTT, canaux de notification, annuaire, config et API HTTP
//! gravitent autour.

pub mod channels;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod health;
pub mod heartbeat;
pub mod http;
pub mod mqtt;
pub mod processor;
pub mod registry;
pub mod sweeper;

pub use dispatcher::{Alert, AlertDispatcher, AlertKind, DispatchOutcome, DispatchReport, DispatchSettings};
pub use heartbeat::{DecodeError, DeviceMessage, Fingerprint, Heartbeat};
pub use processor::{HeartbeatProcessor, Processed, SequenceCheck, VersionChange};
pub use registry::{DeviceHealth, DeviceRegistry, SharedRegistry};
pub use sweeper::InactivitySweeper;
