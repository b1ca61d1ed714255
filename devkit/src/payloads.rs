/*!
Builders de payloads heartbeat

Produit les messages JSON tels que publiés par le firmware des devices,
pour les tests et pour le simulateur.
*/

use heartwatch_kernel::{Fingerprint, Heartbeat};
use serde_json::{json, Value};

pub const DEFAULT_LIBRARY_HASH: u32 = 0x1a2b_3c4d;
pub const DEFAULT_FIRMWARE_HASH: u32 = 0x5e6f_7a8b;

#[derive(Debug, Clone, Copy)]
pub struct PingBuilder {
    sequence: u32,
    rssi: f32,
    library_hash: u32,
    firmware_hash: u32,
}

impl PingBuilder {
    pub fn new(sequence: u32) -> Self {
        Self {
            sequence,
            rssi: -67.0,
            library_hash: DEFAULT_LIBRARY_HASH,
            firmware_hash: DEFAULT_FIRMWARE_HASH,
        }
    }

    pub fn rssi(mut self, rssi: f32) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn library(mut self, hash: u32) -> Self {
        self.library_hash = hash;
        self
    }

    pub fn firmware(mut self, hash: u32) -> Self {
        self.firmware_hash = hash;
        self
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            sequence: self.sequence,
            signal_strength: self.rssi,
            library_fingerprint: Fingerprint(self.library_hash),
            firmware_fingerprint: Fingerprint(self.firmware_hash),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": "ping",
            "sequence": self.sequence,
            "rssi": self.rssi,
            "library_hash": self.library_hash,
            "firmware_hash": self.firmware_hash,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }
}

/// Message d'un autre type, que le moniteur doit ignorer
pub fn other_message(kind: &str) -> Vec<u8> {
    json!({ "type": kind, "uptime": 1234 }).to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use heartwatch_kernel::heartbeat::{decode, DeviceMessage};

    #[test]
    fn test_ping_matches_device_wire_format() {
        let ping = PingBuilder::new(42).rssi(-80.5).firmware(0xdead_beef);
        let decoded = decode(&ping.to_bytes()).unwrap();
        assert_eq!(decoded, DeviceMessage::Ping(ping.heartbeat()));
        assert_eq!(ping.to_json()["firmware_hash"], 0xdead_beef_u32);
    }

    #[test]
    fn test_other_message_is_not_a_ping() {
        assert_eq!(decode(&other_message("boot")).unwrap(), DeviceMessage::Other);
    }
}
