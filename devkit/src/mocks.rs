/*!
Canaux de notification et annuaire simulés

Enregistrent toutes les notifications reçues et permettent de simuler une
panne (webhook injoignable, annuaire indisponible) pour les tests.
*/

use async_trait::async_trait;
use heartwatch_kernel::channels::{Notification, Notifier, NotifyError};
use heartwatch_kernel::directory::{AlertTarget, Directory, DirectoryError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Canal simulé, clonable : tous les clones partagent le même journal
#[derive(Clone)]
pub struct MockNotifier {
    name: String,
    received: Arc<Mutex<Vec<Notification>>>,
    attempts: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MockNotifier {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            received: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Canal qui échoue à chaque appel
    pub fn failing<S: Into<String>>(name: S) -> Self {
        let notifier = Self::new(name);
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Notifications livrées avec succès
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    /// Appels reçus, y compris ceux en échec
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn for_device(&self, device_id: &str) -> Vec<Notification> {
        self.received
            .lock()
            .iter()
            .filter(|n| n.device_id == device_id)
            .cloned()
            .collect()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.received.lock().iter().map(|n| n.subject.clone()).collect()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
        self.attempts.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            tracing::debug!("[mock] {} rejecting notification", self.name);
            return Err(NotifyError::Other(format!("{} unreachable", self.name)));
        }
        self.received.lock().push(notification.clone());
        tracing::debug!("[mock] {} got: {}", self.name, notification.subject);
        Ok(())
    }
}

/// Annuaire simulé : résout tout device vers la même équipe
#[derive(Clone)]
pub struct MockDirectory {
    team_name: String,
    recipients: Vec<String>,
    unavailable: Arc<AtomicBool>,
    lookups: Arc<AtomicUsize>,
}

impl MockDirectory {
    pub fn new<S: Into<String>>(team_name: S, recipients: &[&str]) -> Self {
        Self {
            team_name: team_name.into(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            unavailable: Arc::new(AtomicBool::new(false)),
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self::new("Test Team", &["ops@example.net"])
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn resolve(&self, device_id: &str) -> Result<AlertTarget, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("mock directory down".into()));
        }
        Ok(AlertTarget {
            device_name: format!("device-{device_id}"),
            team_name: self.team_name.clone(),
            recipients: self.recipients.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heartwatch_kernel::channels::Notification;

    fn notification(device: &str) -> Notification {
        Notification {
            alert_id: Default::default(),
            device_id: device.into(),
            device_name: device.into(),
            team_name: "t".into(),
            recipients: vec![],
            subject: format!("alert for {device}"),
            body: String::new(),
            device_url: None,
            group_url: None,
        }
    }

    #[tokio::test]
    async fn test_mock_notifier_records_and_fails() {
        let notifier = MockNotifier::new("email");
        notifier.notify(&notification("a")).await.unwrap();
        notifier.notify(&notification("b")).await.unwrap();
        assert_eq!(notifier.count(), 2);
        assert_eq!(notifier.for_device("a").len(), 1);

        // les clones partagent le journal
        let clone = notifier.clone();
        clone.set_failing(true);
        assert!(notifier.notify(&notification("c")).await.is_err());
        assert_eq!(notifier.count(), 2);
        assert_eq!(notifier.attempts(), 3);
        assert_eq!(notifier.subjects(), vec!["alert for a", "alert for b"]);
    }

    #[tokio::test]
    async fn test_failing_notifier_recovers() {
        let notifier = MockNotifier::failing("webhook");
        assert!(notifier.notify(&notification("a")).await.is_err());
        assert_eq!(notifier.count(), 0);

        notifier.set_failing(false);
        notifier.notify(&notification("a")).await.unwrap();
        assert_eq!(notifier.count(), 1);

        notifier.clear();
        assert_eq!(notifier.attempts(), 0);
        assert!(notifier.received().is_empty());
    }

    #[tokio::test]
    async fn test_mock_directory() {
        let directory = MockDirectory::default();
        let target = directory.resolve("42").await.unwrap();
        assert_eq!(target.device_name, "device-42");
        assert_eq!(target.recipients, vec!["ops@example.net"]);

        directory.set_unavailable(true);
        assert!(directory.resolve("42").await.is_err());
        assert_eq!(directory.lookups(), 2);
    }
}
