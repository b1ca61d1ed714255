/*!
Simulateur de flotte

Génère les heartbeats d'une flotte de devices virtuels, avec des pannes
scriptées : messages perdus, redémarrages, device qui se tait.
*/

use crate::payloads::PingBuilder;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBehaviour {
    Steady,
    /// Saute un numéro de séquence tous les N ticks
    SkipEvery(u32),
    /// Repart de 0 tous les N ticks (reboot)
    RestartEvery(u32),
    /// Ne publie plus rien après N ticks
    SilentAfter(u32),
}

impl FromStr for SimBehaviour {
    type Err = String;

    /// "steady", "skip:10", "restart:50", "silent:20"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "steady" {
            return Ok(Self::Steady);
        }
        let (kind, n) = s
            .split_once(':')
            .ok_or_else(|| format!("unknown behaviour '{s}'"))?;
        let n: u32 = n.parse().map_err(|_| format!("invalid count in '{s}'"))?;
        if n == 0 {
            return Err(format!("count must be positive in '{s}'"));
        }
        match kind {
            "skip" => Ok(Self::SkipEvery(n)),
            "restart" => Ok(Self::RestartEvery(n)),
            "silent" => Ok(Self::SilentAfter(n)),
            _ => Err(format!("unknown behaviour '{kind}'")),
        }
    }
}

#[derive(Debug, Clone)]
struct SimDevice {
    id: String,
    behaviour: SimBehaviour,
    next_sequence: u32,
    ticks: u32,
}

impl SimDevice {
    fn tick(&mut self) -> Option<PingBuilder> {
        self.ticks += 1;
        match self.behaviour {
            SimBehaviour::Steady => {}
            SimBehaviour::SkipEvery(n) if self.ticks % n == 0 => {
                self.next_sequence = self.next_sequence.wrapping_add(1);
            }
            SimBehaviour::RestartEvery(n) if self.ticks % n == 0 => self.next_sequence = 0,
            SimBehaviour::SilentAfter(n) if self.ticks > n => return None,
            _ => {}
        }
        let ping = PingBuilder::new(self.next_sequence).rssi(-60.0 - (self.ticks % 20) as f32);
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Some(ping)
    }
}

pub struct FleetSimulator {
    devices: Vec<SimDevice>,
}

impl FleetSimulator {
    /// `count` devices nommés `sim-1..N`, le i-ème reçoit `behaviours[i]` (Steady au-delà)
    pub fn new(count: usize, behaviours: &[SimBehaviour]) -> Self {
        let devices = (0..count)
            .map(|i| SimDevice {
                id: format!("sim-{}", i + 1),
                behaviour: behaviours.get(i).copied().unwrap_or(SimBehaviour::Steady),
                next_sequence: 1,
                ticks: 0,
            })
            .collect();
        Self { devices }
    }

    pub fn device_ids(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.id.as_str()).collect()
    }

    /// Heartbeats à publier pour ce tick
    pub fn tick(&mut self) -> Vec<(String, PingBuilder)> {
        self.devices
            .iter_mut()
            .filter_map(|d| d.tick().map(|ping| (d.id.clone(), ping)))
            .collect()
    }
}
