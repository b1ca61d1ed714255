/*!
Test Harness pour le moniteur Heartwatch

Câble les composants réels du kernel (registre, processor, sweeper,
dispatcher) autour de canaux et d'un annuaire simulés :
- Injection de heartbeats sans broker MQTT
- Sweeps déclenchés à la main (combiner avec `start_paused` + `advance`)
- Collecte des rapports de livraison pour les assertions
*/

use crate::mocks::{MockDirectory, MockNotifier};
use crate::payloads::PingBuilder;
use heartwatch_kernel::channels::Notifier;
use heartwatch_kernel::health::HealthTracker;
use heartwatch_kernel::mqtt::{self, Disposition, GroupTopics};
use heartwatch_kernel::{
    AlertDispatcher, DeviceHealth, DeviceRegistry, DispatchReport, DispatchSettings,
    HeartbeatProcessor, InactivitySweeper, SequenceCheck, SharedRegistry,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

pub const TEST_GROUP: &str = "test-group";

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub inactivity_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_concurrent: usize,
    /// Sans canaux, les alertes sont seulement loguées
    pub with_channels: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            max_concurrent: 16,
            with_channels: true,
        }
    }
}

/// Harness de test complet pour le moniteur
pub struct TestHarness {
    pub registry: SharedRegistry,
    pub dispatcher: AlertDispatcher,
    pub processor: HeartbeatProcessor,
    pub sweeper: InactivitySweeper,
    pub health: HealthTracker,
    pub topics: GroupTopics,
    pub email: MockNotifier,
    pub webhook: MockNotifier,
    pub directory: MockDirectory,
    pending: Mutex<Vec<JoinHandle<DispatchReport>>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_test_writer()
            .try_init()
            .ok();

        let email = MockNotifier::new("email");
        let webhook = MockNotifier::new("webhook");
        let directory = MockDirectory::default();

        let channels: Vec<Arc<dyn Notifier>> = if options.with_channels {
            vec![Arc::new(email.clone()), Arc::new(webhook.clone())]
        } else {
            Vec::new()
        };
        let settings = DispatchSettings {
            group_id: TEST_GROUP.into(),
            console_url: "https://console.example.net".parse().ok(),
            max_concurrent: options.max_concurrent,
            ..DispatchSettings::default()
        };

        let registry = DeviceRegistry::shared();
        let dispatcher = AlertDispatcher::new(Arc::new(directory.clone()), channels, settings);
        let processor = HeartbeatProcessor::new(registry.clone(), dispatcher.clone());
        let sweeper = InactivitySweeper::new(
            registry.clone(),
            dispatcher.clone(),
            options.inactivity_timeout,
            options.sweep_interval,
        );

        Self {
            registry,
            dispatcher,
            processor,
            sweeper,
            health: HealthTracker::new(),
            topics: GroupTopics::new("heartwatch/groups", TEST_GROUP),
            email,
            webhook,
            directory,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Heartbeat avec les valeurs par défaut du builder
    pub fn send_ping(&self, device_id: &str, sequence: u32) -> SequenceCheck {
        self.send(device_id, PingBuilder::new(sequence))
    }

    pub fn send(&self, device_id: &str, ping: PingBuilder) -> SequenceCheck {
        let processed = self.processor.process(device_id, &ping.heartbeat());
        if let Some(handle) = processed.alert {
            self.pending.lock().push(handle);
        }
        processed.sequence
    }

    /// Fait passer un payload brut par le chemin de réception MQTT complet
    pub fn publish_raw(&self, device_id: &str, payload: &[u8]) -> Disposition {
        let topic = self.topics.device_topic(device_id);
        let mut disposition = mqtt::handle_publish(&self.topics, &self.processor, &self.health, &topic, payload);
        if let Disposition::Heartbeat(processed) = &mut disposition {
            if let Some(handle) = processed.alert.take() {
                self.pending.lock().push(handle);
            }
        }
        disposition
    }

    /// Un passage du sweeper à l'instant courant. Retourne le nombre d'alertes levées.
    pub fn sweep(&self) -> usize {
        let raised = self.sweeper.sweep_once(Instant::now());
        let count = raised.len();
        self.pending.lock().extend(raised);
        count
    }

    /// Avance l'horloge Tokio (runtime en pause) puis lance un sweep
    pub async fn advance_and_sweep(&self, by: Duration) -> usize {
        tokio::time::advance(by).await;
        self.sweep()
    }

    /// Attend la fin de toutes les livraisons en cours et retourne leurs rapports
    pub async fn settle(&self) -> Vec<DispatchReport> {
        let handles = std::mem::take(&mut *self.pending.lock());
        collect_reports(handles).await
    }

    pub fn state(&self, device_id: &str) -> Option<DeviceHealth> {
        self.registry.get(device_id)
    }

    pub fn stats(&self) -> HarnessStats {
        HarnessStats {
            devices_tracked: self.registry.len(),
            devices_alerting: self.registry.alerting_count(),
            alerts_dispatched: self.dispatcher.dispatched(),
            email_delivered: self.email.count(),
            webhook_delivered: self.webhook.count(),
        }
    }

    pub fn reset_channels(&self) {
        self.email.clear();
        self.webhook.clear();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn collect_reports(handles: Vec<JoinHandle<DispatchReport>>) -> Vec<DispatchReport> {
    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => tracing::warn!("[harness] delivery task failed: {e}"),
        }
    }
    reports
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessStats {
    pub devices_tracked: usize,
    pub devices_alerting: usize,
    pub alerts_dispatched: u64,
    pub email_delivered: usize,
    pub webhook_delivered: usize,
}

impl HarnessStats {
    pub fn print(&self) {
        tracing::info!(
            "[harness] devices={} alerting={} dispatched={} email={} webhook={}",
            self.devices_tracked,
            self.devices_alerting,
            self.alerts_dispatched,
            self.email_delivered,
            self.webhook_delivered
        );
    }
}
