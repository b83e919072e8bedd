//! Data types for EZ1 responses

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::errors::ValidationError;

/// Device information (retrieved on demand, never cached)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub firmware_version: String,
    pub ssid: String,
    pub ip_address: String,
    pub min_power: i64, // W
    pub max_power: i64, // W
}

/// Two-valued alarm flag, `"0"` on the wire is normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Normal,
    Alarm,
}

impl AlarmStatus {
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(AlarmStatus::Normal),
            1 => Some(AlarmStatus::Alarm),
            _ => None,
        }
    }

    pub fn is_alarm(self) -> bool {
        self == AlarmStatus::Alarm
    }
}

impl fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlarmStatus::Normal => "normal",
            AlarmStatus::Alarm => "alarm",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmInfo {
    pub off_grid: AlarmStatus,
    pub dc1_short_circuit: AlarmStatus,
    pub dc2_short_circuit: AlarmStatus,
    pub output_fault: AlarmStatus,
}

/// Output data (polled every interval, e.g., 10s)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputData {
    pub p1: f64,  // W
    pub e1: f64,  // kWh today, may reset or regress
    pub te1: f64, // kWh lifetime
    pub p2: f64,  // W
    pub e2: f64,  // kWh today, may reset or regress
    pub te2: f64, // kWh lifetime
}

impl OutputData {
    /// Combined instantaneous power of both inputs in W.
    pub fn total_power(&self) -> f64 {
        self.p1 + self.p2
    }

    /// Combined energy generated today in kWh, as reported by the device.
    pub fn today_energy(&self) -> f64 {
        self.e1 + self.e2
    }

    /// Combined lifetime energy in kWh.
    pub fn lifetime_energy(&self) -> f64 {
        self.te1 + self.te2
    }
}

/// Inverter output switch. The device encodes `0 = on`, `1 = off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerStatus {
    On,
    Off,
}

impl PowerStatus {
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(PowerStatus::On),
            1 => Some(PowerStatus::Off),
            _ => None,
        }
    }

    pub fn wire_value(self) -> u8 {
        match self {
            PowerStatus::On => 0,
            PowerStatus::Off => 1,
        }
    }
}

impl FromStr for PowerStatus {
    type Err = ValidationError;

    /// Accepts the aliases the device documentation uses: `0`/`ON` and `1`/`SLEEP`/`OFF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "ON" => Ok(PowerStatus::On),
            "1" | "SLEEP" | "OFF" => Ok(PowerStatus::Off),
            other => Err(ValidationError::UnknownPowerStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PowerStatus::On => "on",
            PowerStatus::Off => "off",
        })
    }
}

/// Maximum output power setting in W, always within [`PowerLimit::MIN`]..=[`PowerLimit::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PowerLimit(u16);

impl PowerLimit {
    pub const MIN: i64 = 30;
    pub const MAX: i64 = 800;

    pub fn new(watts: i64) -> Result<Self, ValidationError> {
        if (Self::MIN..=Self::MAX).contains(&watts) {
            // Range check above keeps this lossless
            Ok(Self(watts as u16))
        } else {
            Err(ValidationError::PowerLimitOutOfRange {
                limit: watts,
                min: Self::MIN,
                max: Self::MAX,
            })
        }
    }

    pub fn watts(self) -> u16 {
        self.0
    }
}

impl TryFrom<i64> for PowerLimit {
    type Error = ValidationError;

    fn try_from(watts: i64) -> Result<Self, Self::Error> {
        Self::new(watts)
    }
}
