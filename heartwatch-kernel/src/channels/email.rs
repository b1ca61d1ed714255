//! Canal e-mail : un message HTML par destinataire, signé DKIM, remis à un relais SMTP
//! (STARTTLS obligatoire). La connexion est poolée et fermée après 30s d'inactivité.

use super::{ChannelSetupError, Notification, Notifier, NotifyError};
use crate::config::EmailConf;
use async_trait::async_trait;
use handlebars::{Handlebars, RenderError, TemplateError};
use lettre::message::dkim::{DkimConfig, DkimSigningAlgorithm, DkimSigningKey};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    dkim: DkimConfig,
    templates: Handlebars<'static>,
}

impl EmailChannel {
    pub fn from_config(conf: &EmailConf) -> Result<Self, ChannelSetupError> {
        let pem = std::fs::read_to_string(&conf.dkim_private_key).map_err(|source| {
            ChannelSetupError::DkimKeyRead {
                path: conf.dkim_private_key.display().to_string(),
                source,
            }
        })?;
        let key = DkimSigningKey::new(&pem, DkimSigningAlgorithm::Rsa)
            .map_err(|e| ChannelSetupError::DkimKey(e.to_string()))?;
        let dkim = DkimConfig::default_config(conf.dkim_selector.clone(), conf.dkim_domain.clone(), key);

        let from = Mailbox::new(
            Some(conf.from_name.clone()),
            conf.from_address
                .parse()
                .map_err(|e: lettre::address::AddressError| ChannelSetupError::Sender(e.to_string()))?,
        );

        let tls = TlsParameters::new(conf.smtp_host.clone())?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(conf.smtp_host.as_str())
            .port(conf.smtp_port)
            .tls(Tls::Required(tls))
            .pool_config(PoolConfig::new().idle_timeout(Duration::from_secs(30)))
            .build();

        info!(
            "[email] channel ready (relay {}:{}, dkim {}._domainkey.{})",
            conf.smtp_host, conf.smtp_port, conf.dkim_selector, conf.dkim_domain
        );
        let mut templates = Handlebars::new();
        register_templates(&mut templates)?;

        Ok(Self { transport, from, dkim, templates })
    }

    fn build_message(&self, to: &str, subject: &str, html: &str) -> Result<Message, NotifyError> {
        let to: Mailbox = to.parse().map_err(|e: lettre::address::AddressError| NotifyError::Address {
            address: to.to_string(),
            reason: e.to_string(),
        })?;
        let mut message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())?;
        message.sign(&self.dkim);
        Ok(message)
    }
}

#[async_trait]
impl Notifier for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if notification.recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        let html = format_email_body(&self.templates, notification)?;
        info!(alert_id = %notification.alert_id, "[email] emailing {} team members", notification.recipients.len());

        let mut failures = Vec::new();
        for to in &notification.recipients {
            let sent = match self.build_message(to, &notification.subject, &html) {
                Ok(message) => self.transport.send(message).await.map(|_| ()).map_err(NotifyError::from),
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => debug!("[email] sent to {to}"),
                Err(e) => {
                    warn!("[email] delivery to {to} failed: {e}");
                    failures.push(e);
                }
            }
        }

        let total = notification.recipients.len();
        match failures.len() {
            0 => Ok(()),
            1 if total == 1 => Err(failures.remove(0)),
            failed => Err(NotifyError::Partial { failed, total }),
        }
    }
}

const ALERT_TEMPLATE: &str = "alert-body";

// handlebars échappe le HTML de chaque `{{valeur}}` par défaut
const ALERT_BODY: &str = r#"<p>{{subject}}</p>
{{#if device_url}}<p><a href="{{device_url}}">Administer device</a></p>
{{/if}}{{#if body_lines}}<p>{{#each body_lines}}{{this}}{{#unless @last}}<br>
{{/unless}}{{/each}}</p>
{{/if}}<p>You got this e-mail because you are in the "{{team_name}}" team.</p>
"#;

pub fn register_templates(registry: &mut Handlebars<'_>) -> Result<(), TemplateError> {
    registry.register_template_string(ALERT_TEMPLATE, ALERT_BODY)
}

/// Corps HTML : sujet, lien d'administration, détail de l'alerte, pied de page équipe
pub fn format_email_body(registry: &Handlebars<'_>, n: &Notification) -> Result<String, RenderError> {
    let body_lines: Vec<&str> = if n.body.trim().is_empty() { Vec::new() } else { n.body.lines().collect() };
    registry.render(
        ALERT_TEMPLATE,
        &json!({
            "subject": n.subject,
            "device_url": n.device_url,
            "body_lines": body_lines,
            "team_name": n.team_name,
        }),
    )
}
