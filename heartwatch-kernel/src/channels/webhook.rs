//! Canal webhook chat : payload JSON court avec boutons d'action optionnels.

use super::{ChannelSetupError, Notification, Notifier, NotifyError};
use crate::config::WebhookConf;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookPayload {
    pub username: String,
    pub icon_emoji: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Attachment {
    pub color: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    username: String,
    icon_emoji: String,
}

impl WebhookChannel {
    pub fn from_config(conf: &WebhookConf) -> Result<Self, ChannelSetupError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: conf.url.clone(),
            username: conf.username.clone(),
            icon_emoji: conf.icon_emoji.clone(),
        })
    }

    /// Message informatif simple (ex: démarrage du moniteur)
    pub async fn post_info(&self, text: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            username: self.username.clone(),
            icon_emoji: self.icon_emoji.clone(),
            text: Some(text.to_string()),
            attachments: Vec::new(),
        };
        self.send(&payload).await
    }

    pub fn alert_payload(&self, n: &Notification) -> WebhookPayload {
        build_alert_payload(&self.username, &self.icon_emoji, n)
    }

    async fn send(&self, payload: &WebhookPayload) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        response.error_for_status()?;
        debug!("[webhook] payload delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = self.alert_payload(notification);
        self.send(&payload).await
    }
}

pub fn build_alert_payload(username: &str, icon_emoji: &str, n: &Notification) -> WebhookPayload {
    let text = if n.body.trim().is_empty() {
        n.subject.clone()
    } else {
        format!("{}\n{}", n.subject, n.body)
    };

    let mut actions = Vec::new();
    if let Some(url) = &n.device_url {
        actions.push(Action {
            kind: "button".into(),
            text: "View device".into(),
            url: url.clone(),
            style: Some("primary".into()),
        });
    }
    if let Some(url) = &n.group_url {
        actions.push(Action {
            kind: "button".into(),
            text: "View group".into(),
            url: url.clone(),
            style: None,
        });
    }

    WebhookPayload {
        username: username.to_string(),
        icon_emoji: icon_emoji.to_string(),
        text: None,
        attachments: vec![Attachment { color: "danger".into(), text, actions }],
    }
}
