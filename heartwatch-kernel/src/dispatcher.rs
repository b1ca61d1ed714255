/**
 * ALERT DISPATCHER - Fan-out des alertes vers les canaux de notification
 *
 * RÔLE :
 * Résout le device dans l'annuaire, décore le sujet, puis appelle chaque canal
 * en parallèle. Chaque alerte tourne dans sa propre tâche, suivie par un
 * `TaskTracker` et limitée par un sémaphore (pas de rafale illimitée lors
 * d'une panne massive).
 *
 * GARANTIES :
 * - un canal en échec n'empêche jamais la livraison sur un autre
 * - sans canal configuré, l'alerte devient une ligne de log structurée
 * - échec d'annuaire : log + alerte abandonnée, pas de retry
 * - `alert()` retourne le `JoinHandle` : l'appelant peut observer le résultat
 */

use crate::channels::{Notification, Notifier};
use crate::config::MonitorConfig;
use crate::directory::Directory;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Inactivity,
    SequenceGap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub device_id: String,
    pub kind: AlertKind,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutcome {
    pub channel: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Tous les canaux ont été tentés, résultat par canal
    Delivered(Vec<ChannelOutcome>),
    /// Aucun canal configuré : l'alerte a été loguée
    LoggedOnly,
    /// Alerte abandonnée (annuaire indisponible, dispatcher fermé)
    Abandoned(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub alert_id: Uuid,
    pub device_id: String,
    pub kind: AlertKind,
    pub subject: String,
    pub outcome: DispatchOutcome,
}

impl DispatchReport {
    pub fn delivered_on(&self, channel: &str) -> bool {
        self.channel(channel).is_some_and(|c| c.error.is_none())
    }

    pub fn failed_on(&self, channel: &str) -> bool {
        self.channel(channel).is_some_and(|c| c.error.is_some())
    }

    fn channel(&self, channel: &str) -> Option<&ChannelOutcome> {
        match &self.outcome {
            DispatchOutcome::Delivered(outcomes) => outcomes.iter().find(|c| c.channel == channel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub group_id: String,
    pub subject_prefix: String,
    pub console_url: Option<Url>,
    pub max_concurrent: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            subject_prefix: "Heartwatch alert!".into(),
            console_url: None,
            max_concurrent: 16,
        }
    }
}

impl DispatchSettings {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            group_id: cfg.group_id.clone(),
            subject_prefix: cfg.subject_prefix.clone(),
            console_url: cfg.console_url.clone(),
            max_concurrent: cfg.max_concurrent_alerts,
        }
    }
}

struct Inner {
    directory: Arc<dyn Directory>,
    channels: Vec<Arc<dyn Notifier>>,
    settings: DispatchSettings,
    permits: Semaphore,
    tracker: TaskTracker,
    dispatched: AtomicU64,
}

#[derive(Clone)]
pub struct AlertDispatcher {
    inner: Arc<Inner>,
}

impl AlertDispatcher {
    pub fn new(
        directory: Arc<dyn Directory>,
        channels: Vec<Arc<dyn Notifier>>,
        settings: DispatchSettings,
    ) -> Self {
        let permits = Semaphore::new(settings.max_concurrent.max(1));
        Self {
            inner: Arc::new(Inner {
                directory,
                channels,
                settings,
                permits,
                tracker: TaskTracker::new(),
                dispatched: AtomicU64::new(0),
            }),
        }
    }

    /// Lance la livraison en tâche de fond et retourne son handle.
    /// Doit être appelé depuis un runtime Tokio.
    ///
    /// Le sémaphore borne les livraisons, pas les tâches : les tâches en attente d'un
    /// permis restent de l'ordre de la taille de la flotte (une alerte d'inactivité
    /// par device et par épisode de silence).
    /// Après `shutdown()`, l'alerte est loguée puis abandonnée sans être comptée.
    pub fn alert(&self, alert: Alert) -> JoinHandle<DispatchReport> {
        let alert_id = Uuid::new_v4();
        warn!(device_id = %alert.device_id, %alert_id, kind = ?alert.kind, "Device {}: {}", alert.device_id, alert.subject);

        if self.inner.tracker.is_closed() {
            error!(%alert_id, "[dispatcher] dispatcher shut down, alert dropped");
            let report = DispatchReport {
                alert_id,
                device_id: alert.device_id,
                kind: alert.kind,
                subject: alert.subject,
                outcome: DispatchOutcome::Abandoned("dispatcher closed".into()),
            };
            return tokio::spawn(async move { report });
        }
        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);

        let dispatcher = self.clone();
        self.inner
            .tracker
            .spawn(async move { dispatcher.deliver(alert_id, alert).await })
    }

    async fn deliver(&self, alert_id: Uuid, alert: Alert) -> DispatchReport {
        let report = |outcome| DispatchReport {
            alert_id,
            device_id: alert.device_id.clone(),
            kind: alert.kind,
            subject: alert.subject.clone(),
            outcome,
        };

        let Ok(_permit) = self.inner.permits.acquire().await else {
            error!(%alert_id, "[dispatcher] dispatcher closed, alert dropped");
            return report(DispatchOutcome::Abandoned("dispatcher closed".into()));
        };

        let target = match self.inner.directory.resolve(&alert.device_id).await {
            Ok(target) => target,
            Err(e) => {
                error!(%alert_id, device_id = %alert.device_id, "[dispatcher] directory lookup failed, alert dropped: {e}");
                return report(DispatchOutcome::Abandoned(e.to_string()));
            }
        };

        let settings = &self.inner.settings;
        let notification = Notification {
            alert_id,
            device_id: alert.device_id.clone(),
            subject: format!(
                "{} Device \"{}\" ({}): {}",
                settings.subject_prefix, target.device_name, alert.device_id, alert.subject
            ),
            body: alert.body.clone(),
            device_url: device_url(settings, &alert.device_id),
            group_url: group_url(settings),
            device_name: target.device_name,
            team_name: target.team_name,
            recipients: target.recipients,
        };

        if self.inner.channels.is_empty() {
            warn!(
                %alert_id,
                device_id = %notification.device_id,
                subject = %notification.subject,
                body = %notification.body,
                "[dispatcher] no notification channel configured, logging alert instead"
            );
            return report(DispatchOutcome::LoggedOnly);
        }

        let deliveries = self.inner.channels.iter().map(|channel| {
            let notification = &notification;
            async move { (channel.name().to_string(), channel.notify(notification).await) }
        });

        let outcomes = join_all(deliveries)
            .await
            .into_iter()
            .map(|(channel, result)| match result {
                Ok(()) => {
                    info!(%alert_id, "[dispatcher] alert delivered via {channel}");
                    ChannelOutcome { channel, error: None }
                }
                Err(e) => {
                    error!(%alert_id, "[dispatcher] {channel} delivery failed: {e}");
                    ChannelOutcome { channel, error: Some(e.to_string()) }
                }
            })
            .collect();

        report(DispatchOutcome::Delivered(outcomes))
    }

    /// Nombre d'alertes acceptées depuis le démarrage
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.inner.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Refuse toute nouvelle alerte puis attend la fin des livraisons en cours
    pub async fn shutdown(&self) {
        let pending = self.inner.tracker.len();
        if pending > 0 {
            info!("[dispatcher] draining {pending} in-flight alerts");
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.permits.close();
    }
}

fn device_url(settings: &DispatchSettings, device_id: &str) -> Option<String> {
    console_link(settings, &["groups", &settings.group_id, "devices", device_id])
}

fn group_url(settings: &DispatchSettings) -> Option<String> {
    console_link(settings, &["groups", &settings.group_id, "devices"])
}

/// Chaque segment est percent-encodé : un id avec espace ou `?` reste dans le chemin
fn console_link(settings: &DispatchSettings, segments: &[&str]) -> Option<String> {
    let mut url = settings.console_url.clone()?;
    url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
    Some(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::NotifyError;
    use crate::directory::{AlertTarget, DirectoryError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct FixedDirectory(Option<AlertTarget>);

    #[async_trait]
    impl Directory for FixedDirectory {
        async fn resolve(&self, device_id: &str) -> Result<AlertTarget, DirectoryError> {
            self.0
                .clone()
                .ok_or_else(|| DirectoryError::Unavailable(format!("no entry for {device_id}")))
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Notification>>,
        fail: bool,
        delay: Option<Duration>,
        running: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Notifier for Recorder {
        fn name(&self) -> &str {
            if self.fail { "broken" } else { "recorder" }
        }

        async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotifyError::Other("unreachable".into()));
            }
            self.seen.lock().push(n.clone());
            Ok(())
        }
    }

    fn target() -> AlertTarget {
        AlertTarget {
            device_name: "kitchen".into(),
            team_name: "Field Ops".into(),
            recipients: vec!["ada@example.net".into()],
        }
    }

    fn gap_alert(device: &str) -> Alert {
        Alert {
            device_id: device.into(),
            kind: AlertKind::SequenceGap,
            subject: "Expected sequence number 7 but got 9".into(),
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn test_subject_and_links() {
        let recorder = Arc::new(Recorder::default());
        let settings = DispatchSettings {
            group_id: "g1".into(),
            console_url: "https://console.example.net/".parse().ok(),
            ..DispatchSettings::default()
        };
        let dispatcher = AlertDispatcher::new(Arc::new(FixedDirectory(Some(target()))), vec![recorder.clone()], settings);

        let report = dispatcher.alert(gap_alert("dev-1")).await.unwrap();
        assert!(report.delivered_on("recorder"));

        let seen = recorder.seen.lock();
        assert_eq!(
            seen[0].subject,
            "Heartwatch alert! Device \"kitchen\" (dev-1): Expected sequence number 7 but got 9"
        );
        assert_eq!(seen[0].device_url.as_deref(), Some("https://console.example.net/groups/g1/devices/dev-1"));
        assert_eq!(seen[0].group_url.as_deref(), Some("https://console.example.net/groups/g1/devices"));
        assert_eq!(dispatcher.dispatched(), 1);
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_others() {
        let broken = Arc::new(Recorder { fail: true, ..Recorder::default() });
        let healthy = Arc::new(Recorder::default());
        let dispatcher = AlertDispatcher::new(
            Arc::new(FixedDirectory(Some(target()))),
            vec![broken.clone(), healthy.clone()],
            DispatchSettings::default(),
        );

        let report = dispatcher.alert(gap_alert("dev-1")).await.unwrap();
        assert!(report.failed_on("broken"));
        assert!(report.delivered_on("recorder"));
        assert_eq!(healthy.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_directory_failure_abandons_alert() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = AlertDispatcher::new(Arc::new(FixedDirectory(None)), vec![recorder.clone()], DispatchSettings::default());

        let report = dispatcher.alert(gap_alert("dev-1")).await.unwrap();
        assert!(matches!(report.outcome, DispatchOutcome::Abandoned(_)));
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_channels_logs_instead() {
        let dispatcher = AlertDispatcher::new(Arc::new(FixedDirectory(Some(target()))), Vec::new(), DispatchSettings::default());
        let report = dispatcher.alert(gap_alert("dev-1")).await.unwrap();
        assert_eq!(report.outcome, DispatchOutcome::LoggedOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded_and_drained() {
        let slow = Arc::new(Recorder { delay: Some(Duration::from_millis(100)), ..Recorder::default() });
        let settings = DispatchSettings { max_concurrent: 2, ..DispatchSettings::default() };
        let dispatcher = AlertDispatcher::new(Arc::new(FixedDirectory(Some(target()))), vec![slow.clone()], settings);

        for i in 0..10 {
            let _ = dispatcher.alert(gap_alert(&format!("dev-{i}")));
        }
        dispatcher.shutdown().await;

        assert_eq!(slow.seen.lock().len(), 10);
        assert!(slow.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_alerts() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = AlertDispatcher::new(Arc::new(FixedDirectory(Some(target()))), vec![recorder.clone()], DispatchSettings::default());

        let before = dispatcher.alert(gap_alert("dev-1"));
        dispatcher.shutdown().await;
        assert!(before.await.unwrap().delivered_on("recorder"));

        let report = dispatcher.alert(gap_alert("dev-2")).await.unwrap();
        assert_eq!(report.outcome, DispatchOutcome::Abandoned("dispatcher closed".into()));
        assert_eq!(dispatcher.dispatched(), 1);
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn test_links_escape_device_id() {
        let settings = DispatchSettings {
            group_id: "g1".into(),
            console_url: "https://console.example.net/admin".parse().ok(),
            ..DispatchSettings::default()
        };
        assert_eq!(
            device_url(&settings, "lab 3?rev=2").as_deref(),
            Some("https://console.example.net/admin/groups/g1/devices/lab%203%3Frev=2")
        );
        assert_eq!(
            group_url(&settings).as_deref(),
            Some("https://console.example.net/admin/groups/g1/devices")
        );
        assert_eq!(device_url(&DispatchSettings::default(), "dev-1"), None);
    }
}
