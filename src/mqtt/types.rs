use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ez1;
use crate::sensors::{SensorDescription, StateClass, Unit};

fn round(value: f64, decimals: i32) -> f64 {
    let multiplier = 10_f64.powi(decimals);
    (value * multiplier).round() / multiplier
}

#[derive(Serialize)]
pub struct SystemInfo<'a> {
    pub time: DateTime<Utc>,
    pub name: &'a str,
    pub device_id: &'a str,
    pub firmware_version: &'a str,
    pub ssid: &'a str,
    pub ip_address: &'a str,
    pub min_power: i64, // W
    pub max_power: i64, // W
    pub manufacturer: &'static str,
    pub model: &'static str,
}

impl<'a> SystemInfo<'a> {
    pub fn from_ez1(info: &'a ez1::DeviceInfo, name: &'a str) -> Self {
        Self {
            time: Utc::now(),
            name,
            device_id: &info.device_id,
            firmware_version: &info.firmware_version,
            ssid: &info.ssid,
            ip_address: &info.ip_address,
            min_power: info.min_power,
            max_power: info.max_power,
            manufacturer: "APsystems",
            model: "EZ1-M",
        }
    }
}

/// Per-sensor metadata published once so consumers can label the values.
#[derive(Serialize)]
pub struct SensorConfig {
    pub unique_id: String,
    pub name: String,
    pub unit: Unit,
    pub state_class: StateClass,
}

impl SensorConfig {
    pub fn from_description(sensor: &SensorDescription, device_name: &str) -> Self {
        Self {
            unique_id: sensor.unique_id(device_name),
            name: sensor.display_name(device_name),
            unit: sensor.unit,
            state_class: sensor.state_class,
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct Alarms {
    pub off_grid: String,
    pub dc1_short_circuit: String,
    pub dc2_short_circuit: String,
    pub output_fault: String,
}

impl Alarms {
    pub fn from_ez1(alarm: &ez1::AlarmInfo) -> Self {
        Self {
            off_grid: alarm.off_grid.to_string(),
            dc1_short_circuit: alarm.dc1_short_circuit.to_string(),
            dc2_short_circuit: alarm.dc2_short_circuit.to_string(),
            output_fault: alarm.output_fault.to_string(),
        }
    }
}

/// Rounded the way the values are displayed; kWh to 3 decimals, W to 1.
pub fn display_value(value: f64, unit: Unit) -> f64 {
    match unit {
        Unit::Watt => round(value, 1),
        Unit::KiloWattHour => round(value, 3),
    }
}
