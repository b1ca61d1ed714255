use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, path::PathBuf, time::Duration};
use tokio::fs;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for {name}: {reason}")]
    Env { name: &'static str, reason: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Groupe de devices surveillé (un stream MQTT par groupe)
    #[serde(default)]
    pub group_id: String,
    #[serde(with = "humantime_serde", default = "default_inactivity_timeout")]
    pub inactivity_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_health_report_interval")]
    pub health_report_interval: Duration,
    #[serde(default = "default_max_concurrent_alerts")]
    pub max_concurrent_alerts: usize,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Base URL de la console d'administration, pour les liens dans les alertes
    pub console_url: Option<Url>,
    #[serde(default)]
    pub mqtt: MqttConf,
    pub email: Option<EmailConf>,
    pub webhook: Option<WebhookConf>,
    #[serde(default)]
    pub directory: DirectoryConf,
    pub http: Option<HttpConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmailConf {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Clé privée RSA (PEM PKCS#1), aussi publiée en TXT sur le domaine
    pub dkim_private_key: PathBuf,
    pub dkim_domain: String,
    #[serde(default = "default_dkim_selector")]
    pub dkim_selector: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookConf {
    pub url: String,
    #[serde(default = "default_webhook_username")]
    pub username: String,
    #[serde(default = "default_icon_emoji")]
    pub icon_emoji: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DirectoryConf {
    #[serde(default)]
    pub team_name: String,
    #[serde(default)]
    pub members: Vec<MemberConf>,
    /// device id -> nom affiché
    #[serde(default)]
    pub devices: HashMap<String, String>,
    #[serde(default)]
    pub known_devices_only: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemberConf {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub bind: String,
}

fn default_inactivity_timeout() -> Duration { Duration::from_secs(30) }
fn default_sweep_interval() -> Duration { Duration::from_secs(5) }
fn default_reconnect_delay() -> Duration { Duration::from_secs(5) }
fn default_health_report_interval() -> Duration { Duration::from_secs(60) }
fn default_max_concurrent_alerts() -> usize { 16 }
fn default_subject_prefix() -> String { "Heartwatch alert!".into() }
fn default_smtp_port() -> u16 { 25 }
fn default_from_name() -> String { "Heartwatch".into() }
fn default_dkim_selector() -> String { "main".into() }
fn default_webhook_username() -> String { "heartwatch".into() }
fn default_icon_emoji() -> String { ":robot_face:".into() }

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "heartwatch-kernel".into(),
            topic_prefix: "heartwatch/groups".into(),
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            inactivity_timeout: default_inactivity_timeout(),
            sweep_interval: default_sweep_interval(),
            reconnect_delay: default_reconnect_delay(),
            health_report_interval: default_health_report_interval(),
            max_concurrent_alerts: default_max_concurrent_alerts(),
            subject_prefix: default_subject_prefix(),
            console_url: None,
            mqtt: MqttConf::default(),
            email: None,
            webhook: None,
            directory: DirectoryConf::default(),
            http: None,
        }
    }
}

impl MonitorConfig {
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    /// Applique les surcharges d'environnement. `lookup` est injectable pour les tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(group) = lookup("HEARTWATCH_GROUP_ID") {
            self.group_id = group;
        }
        if let Some(raw) = lookup("HEARTWATCH_INACTIVITY_TIMEOUT") {
            self.inactivity_timeout = humantime::parse_duration(&raw).map_err(|e| ConfigError::Env {
                name: "HEARTWATCH_INACTIVITY_TIMEOUT",
                reason: e.to_string(),
            })?;
        }
        if let Some(url) = lookup("HEARTWATCH_WEBHOOK_URL").filter(|u| !u.is_empty()) {
            match self.webhook.as_mut() {
                Some(webhook) => webhook.url = url,
                None => {
                    self.webhook = Some(WebhookConf {
                        url,
                        username: default_webhook_username(),
                        icon_emoji: default_icon_emoji(),
                    })
                }
            }
        }
        if let Some(key) = lookup("HEARTWATCH_DKIM_KEY").filter(|k| !k.is_empty()) {
            match self.email.as_mut() {
                Some(email) => email.dkim_private_key = PathBuf::from(key),
                None => tracing::warn!("[config] HEARTWATCH_DKIM_KEY set but no email section, ignored"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::Invalid("group_id is required".into()));
        }
        if self.inactivity_timeout.is_zero() {
            return Err(ConfigError::Invalid("inactivity_timeout must be > 0".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("sweep_interval must be > 0".into()));
        }
        if self.max_concurrent_alerts == 0 {
            return Err(ConfigError::Invalid("max_concurrent_alerts must be > 0".into()));
        }
        Ok(())
    }
}

/// Charge la config depuis `HEARTWATCH_CONFIG` (défaut `heartwatch.yaml`), applique
/// l'environnement puis valide. Un fichier absent donne la config par défaut.
pub async fn load_config() -> Result<MonitorConfig, ConfigError> {
    let path = std::env::var("HEARTWATCH_CONFIG").unwrap_or_else(|_| "heartwatch.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        MonitorConfig::from_yaml(&txt)?
    } else {
        tracing::warn!("[config] {path} not found, using default configuration");
        MonitorConfig::default()
    };
    cfg.apply_env(|name| std::env::var(name).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = MonitorConfig::from_yaml("group_id: fleet-1\n").unwrap();
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(30));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.max_concurrent_alerts, 16);
        assert_eq!(cfg.mqtt.port, 1883);
        assert!(cfg.email.is_none());
        assert!(cfg.webhook.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
group_id: "17dh0cf43jg007"
inactivity_timeout: 2m
console_url: https://console.example.net
mqtt:
  host: broker.local
  port: 8883
  client_id: hw-test
  topic_prefix: fleet
  keep_alive: 20s
email:
  smtp_host: mx.example.net
  from_address: no-reply@example.net
  dkim_private_key: /etc/heartwatch/dkim.pem
  dkim_domain: example.net
webhook:
  url: https://hooks.example.net/T000
directory:
  team_name: Field Ops
  members:
    - name: Ada
      email: ada@example.net
    - name: Bob
  devices:
    "357518080000001": kitchen-sensor
"#
        )
        .unwrap();
        let txt = std::fs::read_to_string(file.path()).unwrap();
        let cfg = MonitorConfig::from_yaml(&txt).unwrap();
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(120));
        assert_eq!(cfg.mqtt.topic_prefix, "fleet");
        assert_eq!(cfg.console_url.unwrap().host_str(), Some("console.example.net"));
        let email = cfg.email.unwrap();
        assert_eq!(email.smtp_port, 25);
        assert_eq!(email.dkim_selector, "main");
        assert_eq!(cfg.webhook.unwrap().username, "heartwatch");
        assert_eq!(cfg.directory.members.len(), 2);
        assert_eq!(cfg.directory.devices["357518080000001"], "kitchen-sensor");
    }

    #[test]
    fn test_console_url_must_be_absolute() {
        let err = MonitorConfig::from_yaml("group_id: g\nconsole_url: not a url\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = MonitorConfig::default();
        cfg.apply_env(|name| match name {
            "HEARTWATCH_GROUP_ID" => Some("from-env".into()),
            "HEARTWATCH_INACTIVITY_TIMEOUT" => Some("45s".into()),
            "HEARTWATCH_WEBHOOK_URL" => Some("https://hooks.example.net/x".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.group_id, "from-env");
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(45));
        assert_eq!(cfg.webhook.unwrap().url, "https://hooks.example.net/x");

        let mut cfg = MonitorConfig::default();
        let err = cfg
            .apply_env(|name| (name == "HEARTWATCH_INACTIVITY_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_validation() {
        assert!(MonitorConfig::default().validate().is_err());
        let mut cfg = MonitorConfig { group_id: "g".into(), ..MonitorConfig::default() };
        cfg.validate().unwrap();
        cfg.max_concurrent_alerts = 0;
        assert!(cfg.validate().is_err());
    }
}
