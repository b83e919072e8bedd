//! MQTT output
//!
//! Publishes the sensor table, availability, device info and alarms below
//! `<root>/<device_id>/`.

pub mod context;
pub mod publisher;
pub mod types;

pub use publisher::{MqttPublisher, SensorPublisher};
pub use types::*;
