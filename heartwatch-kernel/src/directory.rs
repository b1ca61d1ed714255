//! Résolution device -> (nom affiché, équipe, destinataires).

use crate::config::DirectoryConf;
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("unknown device {0}")]
    UnknownDevice(String),
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertTarget {
    pub device_name: String,
    pub team_name: String,
    /// Adresses de notification des membres de l'équipe
    pub recipients: Vec<String>,
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn resolve(&self, device_id: &str) -> Result<AlertTarget, DirectoryError>;
}

/// Annuaire figé, construit depuis la section `directory` de la config
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    team_name: String,
    recipients: Vec<String>,
    devices: HashMap<String, String>,
    known_devices_only: bool,
}

impl StaticDirectory {
    pub fn from_config(conf: &DirectoryConf) -> Self {
        let recipients: Vec<String> = conf
            .members
            .iter()
            .filter_map(|m| m.email.clone())
            .filter(|e| !e.trim().is_empty())
            .collect();
        Self {
            team_name: conf.team_name.clone(),
            recipients,
            devices: conf.devices.clone(),
            known_devices_only: conf.known_devices_only,
        }
    }

    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn resolve(&self, device_id: &str) -> Result<AlertTarget, DirectoryError> {
        let device_name = match self.devices.get(device_id) {
            Some(name) => name.clone(),
            None if self.known_devices_only => {
                return Err(DirectoryError::UnknownDevice(device_id.to_string()))
            }
            None => device_id.to_string(),
        };
        Ok(AlertTarget {
            device_name,
            team_name: self.team_name.clone(),
            recipients: self.recipients.clone(),
        })
    }
}
