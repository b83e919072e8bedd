use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};

use crate::errors::MqttError;

pub trait MqttPayload {
    fn to_payload(&self) -> String;
}

impl MqttPayload for DateTime<Utc> {
    fn to_payload(&self) -> String {
        self.to_rfc3339()
    }
}

impl MqttPayload for String {
    fn to_payload(&self) -> String {
        self.clone()
    }
}

impl MqttPayload for bool {
    fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl MqttPayload for f64 {
    fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl MqttPayload for i64 {
    fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl<T: MqttPayload> MqttPayload for Option<T> {
    fn to_payload(&self) -> String {
        match self {
            Some(value) => value.to_payload(),
            None => String::new(),
        }
    }
}

pub struct PublishContext<'a> {
    client: &'a AsyncClient,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
}

impl<'a> PublishContext<'a> {
    pub fn new(client: &'a AsyncClient, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }

    /// Queue a message without waiting; fails when the request queue is full.
    pub fn publish<T: MqttPayload>(&self, topic: &str, payload: &T) -> Result<(), MqttError> {
        let full_topic = if topic.is_empty() {
            self.topic.clone()
        } else {
            format!("{}/{}", self.topic, topic)
        };
        self.client
            .try_publish(&full_topic, self.qos, self.retain, payload.to_payload())
            .map_err(|e| MqttError::PublishFailed {
                topic: full_topic,
                reason: e.to_string(),
            })
    }
}
