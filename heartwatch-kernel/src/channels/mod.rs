/**
 * NOTIFICATION CHANNELS - Canaux de sortie des alertes
 *
 * RÔLE :
 * Interface commune que chaque canal (e-mail, webhook chat...) implémente.
 * Chaque canal formate son propre message à partir d'une `Notification`.
 *
 * CONTRAT :
 * - best-effort : on tente, on logue l'échec, pas de file de retry
 * - un canal en échec ne doit jamais bloquer les autres (géré par le dispatcher)
 */

pub mod email;
pub mod webhook;

pub use email::EmailChannel;
pub use webhook::WebhookChannel;

use crate::config::MonitorConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("no recipients")]
    NoRecipients,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("cannot build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("cannot render message: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error("{failed}/{total} deliveries failed")]
    Partial { failed: usize, total: usize },
    #[error("{0}")]
    Other(String),
}

/// Erreurs de construction d'un canal au démarrage (fatales pour le process)
#[derive(Debug, thiserror::Error)]
pub enum ChannelSetupError {
    #[error("cannot read DKIM key {path}: {source}")]
    DkimKeyRead {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid DKIM key: {0}")]
    DkimKey(String),
    #[error("invalid message template: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("invalid sender address: {0}")]
    Sender(String),
    #[error("smtp setup: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("http client setup: {0}")]
    Http(#[from] reqwest::Error),
}

/// Alerte résolue et prête à être formatée par chaque canal
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub alert_id: Uuid,
    pub device_id: String,
    pub device_name: String,
    pub team_name: String,
    pub recipients: Vec<String>,
    /// Sujet déjà décoré (préfixe + nom du device)
    pub subject: String,
    pub body: String,
    pub device_url: Option<String>,
    pub group_url: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Canaux construits depuis la config. Le webhook est aussi exposé seul pour
/// les messages informatifs (démarrage).
pub struct ConfiguredChannels {
    pub notifiers: Vec<Arc<dyn Notifier>>,
    pub webhook: Option<Arc<WebhookChannel>>,
}

pub fn from_config(cfg: &MonitorConfig) -> Result<ConfiguredChannels, ChannelSetupError> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    match &cfg.email {
        Some(email) => notifiers.push(Arc::new(EmailChannel::from_config(email)?)),
        None => warn!("[channels] no email section, e-mail alerts disabled"),
    }

    let webhook = match &cfg.webhook {
        Some(conf) => {
            let channel = Arc::new(WebhookChannel::from_config(conf)?);
            notifiers.push(channel.clone());
            Some(channel)
        }
        None => {
            warn!("[channels] no webhook URL specified, chat alerts disabled");
            None
        }
    };

    Ok(ConfiguredChannels { notifiers, webhook })
}
