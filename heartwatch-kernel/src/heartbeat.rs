/**
 * HEARTBEAT DECODER - Décodage des messages devices
 *
 * RÔLE :
 * Transforme le payload opaque reçu du stream en enregistrement typé.
 * Fonction pure, aucun état.
 *
 * FORMAT :
 * ```json
 * {"type":"ping","sequence":7,"rssi":-87.5,"library_hash":3735928559,"firmware_hash":305419896}
 * ```
 * Les autres types de message sont décodés en `DeviceMessage::Other` et ignorés.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,
    #[error("malformed device message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Empreinte opaque d'un build (hash court), utilisée seulement pour détecter un changement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u32);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub sequence: u32,
    #[serde(rename = "rssi")]
    pub signal_strength: f32,
    #[serde(rename = "library_hash")]
    pub library_fingerprint: Fingerprint,
    #[serde(rename = "firmware_hash")]
    pub firmware_fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    Ping(Heartbeat),
    #[serde(other)]
    Other,
}

impl DeviceMessage {
    pub fn heartbeat(&self) -> Option<&Heartbeat> {
        match self {
            DeviceMessage::Ping(hb) => Some(hb),
            DeviceMessage::Other => None,
        }
    }
}

pub fn decode(payload: &[u8]) -> Result<DeviceMessage, DecodeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}
