//! EZ1 client wrapper
//!
//! High-level interface to the EZ1 local HTTP API. Every call is a single GET
//! against `http://<host>:<port>/<endpoint>` answering `{"data": {...}}`.

use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::types::*;
use crate::errors::{DeviceError, ProtocolError, TransportError};

pub const DEFAULT_PORT: u16 = 8050;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

type Data = Map<String, Value>;

fn invalid_value(endpoint: &str, name: &str, value: &Value) -> ProtocolError {
    ProtocolError::InvalidValue {
        endpoint: endpoint.to_string(),
        field: name.to_string(),
        value: value.to_string(),
    }
}

fn find_field<'a>(data: &'a Data, endpoint: &str, name: &str) -> Result<&'a Value, ProtocolError> {
    data.get(name).ok_or_else(|| ProtocolError::MissingField {
        endpoint: endpoint.to_string(),
        field: name.to_string(),
    })
}

/// The firmware sends numbers either as JSON numbers or as numeric strings.
fn get_number(data: &Data, endpoint: &str, name: &str) -> Result<f64, ProtocolError> {
    let value = find_field(data, endpoint, name)?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number
        .filter(|n| n.is_finite())
        .ok_or_else(|| invalid_value(endpoint, name, value))
}

fn get_integer(data: &Data, endpoint: &str, name: &str) -> Result<i64, ProtocolError> {
    let value = find_field(data, endpoint, name)?;
    let integer = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    };
    integer.ok_or_else(|| invalid_value(endpoint, name, value))
}

fn get_string(data: &Data, endpoint: &str, name: &str) -> Result<String, ProtocolError> {
    let value = find_field(data, endpoint, name)?;
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(invalid_value(endpoint, name, value)),
    }
}

fn get_alarm(data: &Data, endpoint: &str, name: &str) -> Result<AlarmStatus, ProtocolError> {
    let raw = get_integer(data, endpoint, name)?;
    AlarmStatus::from_wire(raw).ok_or_else(|| invalid_value(endpoint, name, &Value::from(raw)))
}

fn get_power_status(data: &Data, endpoint: &str) -> Result<PowerStatus, ProtocolError> {
    let raw = get_integer(data, endpoint, "status")?;
    PowerStatus::from_wire(raw)
        .ok_or_else(|| invalid_value(endpoint, "status", &Value::from(raw)))
}

fn transport_error(endpoint: &str, timeout: Duration, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            endpoint: endpoint.to_string(),
            timeout,
        }
    } else if let Some(status) = error.status() {
        TransportError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        }
    } else {
        TransportError::Request {
            endpoint: endpoint.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Extracts the top-level `data` object; anything else breaks the contract.
pub fn parse_envelope(endpoint: &str, body: &[u8]) -> Result<Data, ProtocolError> {
    let json: Value = serde_json::from_slice(body).map_err(|e| ProtocolError::InvalidJson {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    match json {
        Value::Object(mut root) => match root.remove("data") {
            Some(Value::Object(data)) => Ok(data),
            _ => Err(ProtocolError::MissingData {
                endpoint: endpoint.to_string(),
            }),
        },
        _ => Err(ProtocolError::MissingData {
            endpoint: endpoint.to_string(),
        }),
    }
}

pub fn parse_device_info(data: &Data) -> Result<DeviceInfo, ProtocolError> {
    const ENDPOINT: &str = "getDeviceInfo";
    Ok(DeviceInfo {
        device_id: get_string(data, ENDPOINT, "deviceId")?,
        firmware_version: get_string(data, ENDPOINT, "devVer")?,
        ssid: get_string(data, ENDPOINT, "ssid")?,
        ip_address: get_string(data, ENDPOINT, "ipAddr")?,
        min_power: get_integer(data, ENDPOINT, "minPower")?,
        max_power: get_integer(data, ENDPOINT, "maxPower")?,
    })
}

pub fn parse_alarm_info(data: &Data) -> Result<AlarmInfo, ProtocolError> {
    const ENDPOINT: &str = "getAlarm";
    Ok(AlarmInfo {
        off_grid: get_alarm(data, ENDPOINT, "og")?,
        dc1_short_circuit: get_alarm(data, ENDPOINT, "isce1")?,
        dc2_short_circuit: get_alarm(data, ENDPOINT, "isce2")?,
        output_fault: get_alarm(data, ENDPOINT, "oe")?,
    })
}

pub fn parse_output_data(data: &Data) -> Result<OutputData, ProtocolError> {
    const ENDPOINT: &str = "getOutputData";
    Ok(OutputData {
        p1: get_number(data, ENDPOINT, "p1")?,
        e1: get_number(data, ENDPOINT, "e1")?,
        te1: get_number(data, ENDPOINT, "te1")?,
        p2: get_number(data, ENDPOINT, "p2")?,
        e2: get_number(data, ENDPOINT, "e2")?,
        te2: get_number(data, ENDPOINT, "te2")?,
    })
}

/// EZ1 client wrapper
#[derive(Clone)]
pub struct Ez1Client {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl Ez1Client {
    /// Create a client for the inverter at `host:port`
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        Self::with_base_url(format!("http://{}:{}", host, port), timeout)
    }

    /// Create a client against an explicit base URL such as `http://192.168.1.50:8050`
    pub fn with_base_url(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                endpoint: base_url.clone(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;
        info!("EZ1 client targeting {} (timeout {:?})", base_url, timeout);

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue exactly one GET and return the `data` object of the response.
    async fn request(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Data, DeviceError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, ?query, "EZ1 request");

        let mut request = self.client.get(&url).timeout(self.timeout);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(endpoint, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(endpoint, self.timeout, e))?;

        Ok(parse_envelope(endpoint, &body)?)
    }

    pub async fn get_device_info(&self) -> Result<DeviceInfo, DeviceError> {
        let data = self.request("getDeviceInfo", &[]).await?;
        Ok(parse_device_info(&data)?)
    }

    pub async fn get_alarm_info(&self) -> Result<AlarmInfo, DeviceError> {
        let data = self.request("getAlarm", &[]).await?;
        Ok(parse_alarm_info(&data)?)
    }

    pub async fn get_output_data(&self) -> Result<OutputData, DeviceError> {
        let data = self.request("getOutputData", &[]).await?;
        Ok(parse_output_data(&data)?)
    }

    /// Combined power of both inputs in W
    pub async fn get_total_output(&self) -> Result<f64, DeviceError> {
        Ok(self.get_output_data().await?.total_power())
    }

    /// Combined energy generated today in kWh
    pub async fn get_total_energy_today(&self) -> Result<f64, DeviceError> {
        Ok(self.get_output_data().await?.today_energy())
    }

    /// Combined lifetime energy in kWh
    pub async fn get_total_energy_lifetime(&self) -> Result<f64, DeviceError> {
        Ok(self.get_output_data().await?.lifetime_energy())
    }

    pub async fn get_max_power(&self) -> Result<i64, DeviceError> {
        let data = self.request("getMaxPower", &[]).await?;
        Ok(get_integer(&data, "getMaxPower", "maxPower")?)
    }

    /// Set the maximum output power.
    ///
    /// The limit is checked before anything is sent. The returned value is the
    /// limit the device confirmed, which is authoritative over the requested one.
    pub async fn set_max_power(&self, limit: i64) -> Result<i64, DeviceError> {
        let limit = PowerLimit::new(limit)?;
        info!("Setting max power to {} W", limit.watts());
        let data = self
            .request("setMaxPower", &[("p", limit.watts().to_string())])
            .await?;
        Ok(get_integer(&data, "setMaxPower", "maxPower")?)
    }

    pub async fn get_power_status(&self) -> Result<PowerStatus, DeviceError> {
        let data = self.request("getOnOff", &[]).await?;
        Ok(get_power_status(&data, "getOnOff")?)
    }

    /// Switch the inverter output on or off and return the confirmed status.
    pub async fn set_power_status(&self, desired: PowerStatus) -> Result<PowerStatus, DeviceError> {
        info!("Setting power status to {}", desired);
        let data = self
            .request("setOnOff", &[("status", desired.wire_value().to_string())])
            .await?;
        Ok(get_power_status(&data, "setOnOff")?)
    }

    /// Like [`Ez1Client::set_power_status`], taking one of `0`, `ON`, `1`, `SLEEP`, `OFF`.
    pub async fn set_power_status_alias(&self, token: &str) -> Result<PowerStatus, DeviceError> {
        let desired: PowerStatus = token.parse()?;
        self.set_power_status(desired).await
    }
}
