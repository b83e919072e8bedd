//! Sensor table
//!
//! Every published quantity is one row: which field(s) it reads, its unit and
//! how consumers should treat it over time. [`SensorAdapter`] turns coordinator
//! snapshots into readings for every row.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::coordinator::RefreshState;
use crate::energy::EnergyAccumulator;
use crate::ez1::OutputData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    #[serde(rename = "W")]
    Watt,
    #[serde(rename = "kWh")]
    KiloWattHour,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Unit::Watt => "W",
            Unit::KiloWattHour => "kWh",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    /// Instantaneous value
    Measurement,
    /// Lifetime counter
    Total,
    /// Counter that restarts each day, repaired per channel by an [`EnergyAccumulator`]
    TotalIncreasing,
}

/// Where a row takes its value from
#[derive(Clone, Copy)]
pub enum Source {
    /// A field (or field sum) of the raw output data
    Field(fn(&OutputData) -> f64),
    /// Sum of other rows, after their counters were repaired
    Sum(&'static [&'static str]),
}

pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Unit,
    pub state_class: StateClass,
    pub source: Source,
}

impl SensorDescription {
    pub fn unique_id(&self, device_name: &str) -> String {
        format!("ez1_{}_{}", device_name, self.key)
    }

    pub fn display_name(&self, device_name: &str) -> String {
        format!("APsystems {} {}", device_name, self.name)
    }
}

pub static SENSORS: &[SensorDescription] = &[
    SensorDescription {
        key: "total_power",
        name: "Total Power",
        unit: Unit::Watt,
        state_class: StateClass::Measurement,
        source: Source::Field(OutputData::total_power),
    },
    SensorDescription {
        key: "total_power_p1",
        name: "Total Power P1",
        unit: Unit::Watt,
        state_class: StateClass::Measurement,
        source: Source::Field(|d| d.p1),
    },
    SensorDescription {
        key: "total_power_p2",
        name: "Total Power P2",
        unit: Unit::Watt,
        state_class: StateClass::Measurement,
        source: Source::Field(|d| d.p2),
    },
    SensorDescription {
        key: "lifetime_production",
        name: "Lifetime Production",
        unit: Unit::KiloWattHour,
        state_class: StateClass::Total,
        source: Source::Field(OutputData::lifetime_energy),
    },
    SensorDescription {
        key: "lifetime_production_p1",
        name: "Lifetime Production P1",
        unit: Unit::KiloWattHour,
        state_class: StateClass::Total,
        source: Source::Field(|d| d.te1),
    },
    SensorDescription {
        key: "lifetime_production_p2",
        name: "Lifetime Production P2",
        unit: Unit::KiloWattHour,
        state_class: StateClass::Total,
        source: Source::Field(|d| d.te2),
    },
    SensorDescription {
        key: "today_production",
        name: "Today Production",
        unit: Unit::KiloWattHour,
        state_class: StateClass::TotalIncreasing,
        source: Source::Sum(&["today_production_p1", "today_production_p2"]),
    },
    SensorDescription {
        key: "today_production_p1",
        name: "Today Production P1",
        unit: Unit::KiloWattHour,
        state_class: StateClass::TotalIncreasing,
        source: Source::Field(|d| d.e1),
    },
    SensorDescription {
        key: "today_production_p2",
        name: "Today Production P2",
        unit: Unit::KiloWattHour,
        state_class: StateClass::TotalIncreasing,
        source: Source::Field(|d| d.e2),
    },
];

pub fn find_sensor(key: &str) -> Option<&'static SensorDescription> {
    SENSORS.iter().find(|s| s.key == key)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub key: &'static str,
    /// Last known value, kept through outages. `None` before the first success.
    pub value: Option<f64>,
    pub unit: Unit,
    pub available: bool,
}

/// Maps snapshots onto the sensor table, one accumulator per "today" channel.
pub struct SensorAdapter {
    sensors: &'static [SensorDescription],
    accumulators: HashMap<&'static str, EnergyAccumulator>,
    last_values: HashMap<&'static str, f64>,
}

impl Default for SensorAdapter {
    fn default() -> Self {
        Self::new(SENSORS)
    }
}

impl SensorAdapter {
    pub fn new(sensors: &'static [SensorDescription]) -> Self {
        let accumulators = sensors
            .iter()
            .filter(|s| s.state_class == StateClass::TotalIncreasing)
            .filter(|s| matches!(s.source, Source::Field(_)))
            .map(|s| (s.key, EnergyAccumulator::new()))
            .collect();

        Self {
            sensors,
            accumulators,
            last_values: HashMap::new(),
        }
    }

    /// Readings for every table row. Values only move on successful snapshots;
    /// after a failed cycle the previous values are returned as unavailable.
    pub fn update(&mut self, state: &RefreshState, today: NaiveDate) -> Vec<SensorReading> {
        let fresh = match state.last_data {
            Some(data) if state.last_success => Some(data),
            _ => None,
        };

        if let Some(data) = fresh {
            for sensor in self.sensors {
                let Source::Field(extract) = sensor.source else {
                    continue;
                };
                let raw = extract(&data);
                let value = match self.accumulators.get_mut(sensor.key) {
                    Some(accumulator) => accumulator.update(raw, today),
                    None => raw,
                };
                self.last_values.insert(sensor.key, value);
            }
            // Totals over repaired channels stay equal to the sum of their parts
            for sensor in self.sensors {
                let Source::Sum(keys) = sensor.source else {
                    continue;
                };
                let value = keys
                    .iter()
                    .filter_map(|key| self.last_values.get(key))
                    .sum::<f64>();
                self.last_values.insert(sensor.key, value);
            }
        }

        self.sensors
            .iter()
            .map(|sensor| SensorReading {
                key: sensor.key,
                value: self.last_values.get(sensor.key).copied(),
                unit: sensor.unit,
                available: state.last_success,
            })
            .collect()
    }
}
