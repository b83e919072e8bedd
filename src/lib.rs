//! EZ1 to MQTT Bridge
//!
//! Polls an APsystems EZ1 micro-inverter over its local HTTP API and publishes
//! repaired power and energy values to MQTT.

pub mod config;
pub mod coordinator;
pub mod energy;
pub mod errors;
pub mod ez1;
pub mod mqtt;
pub mod sensors;

pub use config::Config;
pub use coordinator::PollingCoordinator;
pub use ez1::client::Ez1Client;
pub use mqtt::publisher::MqttPublisher;
