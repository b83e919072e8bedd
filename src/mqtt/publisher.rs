use crate::config::Config;
use crate::coordinator::{Listener, RefreshState};
use crate::errors::MqttError;
use crate::ez1::PowerStatus;
use crate::mqtt::context::PublishContext;
use crate::mqtt::{display_value, Alarms, SensorConfig, SystemInfo};
use crate::sensors::{SensorAdapter, SensorReading, SENSORS};
use chrono::Local;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    root_topic: String,
}

macro_rules! publish_if_changed {
    ($context:expr, $src:ident , $old:ident, $field:ident) => {
        if $old.as_ref().map_or(true, |o| o.$field != $src.$field) {
            $context.publish(stringify!($field), &$src.$field)?;
        }
    };
}

impl MqttPublisher {
    /// Connect to the broker. Must be called from within a tokio runtime.
    pub fn new(config: &Config, device_id: &str) -> Result<Self, MqttError> {
        let client_id = format!("ez1-mqtt-rs-{}", device_id);

        tracing::info!(
            "Using MQTT TCP connection: {}:{}",
            config.mqtt.host,
            config.mqtt.port
        );
        let mut mqtt_options = MqttOptions::new(client_id, &config.mqtt.host, config.mqtt.port);

        if !config.mqtt.username.is_empty() {
            mqtt_options.set_credentials(&config.mqtt.username, &config.mqtt.password);
        }

        mqtt_options.set_keep_alive(Duration::from_secs(60));

        // Set Last Will and Testament - publish "false" to online topic when connection is lost
        let online_topic = format!("{}/{}/online", config.mqtt.root, device_id);
        mqtt_options.set_last_will(rumqttc::LastWill {
            topic: online_topic,
            message: b"false".to_vec().into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 64);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // On connection error, crash the process (let it crash philosophy)
                        tracing::error!("MQTT connection error: {:?}", e);
                        std::process::exit(1);
                    }
                }
            }
        });
        let root_topic = format!("{}/{}", config.mqtt.root, device_id);

        Ok(Self { client, root_topic })
    }

    pub fn context(&'_ self, topic: &str) -> PublishContext<'_> {
        let full_topic = if topic.is_empty() {
            self.root_topic.clone()
        } else {
            format!("{}/{}", self.root_topic, topic)
        };
        PublishContext::new(&self.client, full_topic)
    }

    pub fn publish_online_status(&self, online: bool) -> Result<(), MqttError> {
        let context = self.context("");
        context.publish("online", &online)
    }

    /// Publish device info as JSON
    pub fn publish_system_info(&self, info: &SystemInfo) -> Result<(), MqttError> {
        let context = self.context("");
        let json =
            serde_json::to_string(info).map_err(|error| MqttError::SerializationError { error })?;

        context.publish("info", &json)
    }

    /// Publish the sensor table so consumers know units and ids
    pub fn publish_sensor_config(&self, device_name: &str) -> Result<(), MqttError> {
        let context = self.context("config");
        for sensor in SENSORS {
            let json = serde_json::to_string(&SensorConfig::from_description(sensor, device_name))
                .map_err(|error| MqttError::SerializationError { error })?;
            context.publish(sensor.key, &json)?;
        }
        Ok(())
    }

    /// Publish alarm flags, only those that changed compared to old
    pub fn publish_alarms(&self, alarms: &Alarms, old: Option<&Alarms>) -> Result<(), MqttError> {
        let context = self.context("alarm");
        publish_if_changed!(context, alarms, old, off_grid);
        publish_if_changed!(context, alarms, old, dc1_short_circuit);
        publish_if_changed!(context, alarms, old, dc2_short_circuit);
        publish_if_changed!(context, alarms, old, output_fault);

        Ok(())
    }

    pub fn publish_max_power(&self, watts: i64) -> Result<(), MqttError> {
        self.context("").publish("max_power", &watts)
    }

    pub fn publish_power_status(&self, status: PowerStatus) -> Result<(), MqttError> {
        self.context("").publish("power_status", &status.to_string())
    }
}

/// Coordinator listener publishing the sensor table values.
pub struct SensorPublisher {
    publisher: MqttPublisher,
    adapter: SensorAdapter,
    last_values: HashMap<&'static str, f64>,
    last_online: Option<bool>,
    last_error: Option<String>,
}

impl SensorPublisher {
    pub fn new(publisher: MqttPublisher) -> Self {
        Self {
            publisher,
            adapter: SensorAdapter::default(),
            last_values: HashMap::new(),
            last_online: None,
            last_error: None,
        }
    }

    /// Publish availability and every sensor whose displayed value changed
    fn publish(&mut self, state: &RefreshState, readings: &[SensorReading]) -> Result<(), MqttError> {
        if self.last_online != Some(state.last_success) {
            self.publisher.publish_online_status(state.last_success)?;
            self.last_online = Some(state.last_success);
        }

        let context = self.publisher.context("status");
        for reading in readings {
            let Some(value) = reading.value else {
                continue;
            };
            let value = display_value(value, reading.unit);
            if self.last_values.get(reading.key) != Some(&value) {
                context.publish(reading.key, &value)?;
                self.last_values.insert(reading.key, value);
            }
        }

        let error = state.last_error.as_ref().map(|e| e.to_string());
        if self.last_error != error {
            context.publish("error", &error)?;
            self.last_error = error;
        }

        if let Some(time) = state.last_update {
            context.publish("time", &time)?;
        }

        Ok(())
    }
}

impl Listener for SensorPublisher {
    fn on_refresh(&mut self, state: &RefreshState) {
        let readings = self.adapter.update(state, Local::now().date_naive());
        if let Err(e) = self.publish(state, &readings) {
            tracing::error!("Failed to publish sensor values: {}", e);
        }
    }
}
