//! Home Assistant MQTT discovery.
//!
//! Every supported reading of a meter becomes one sensor entity. The
//! descriptor is published retained to
//! `<prefix>/sensor/<reading>/<uid>/config`, for example
//! `homeassistant/sensor/power-consumption/0x08833976/config`.

use crate::config::HomeAssistantConfig;
use crate::error::PublishError;
use crate::publish::Publisher;
use crate::state::json_key;
use metrology_meter::{Meter, Params, Reading};
use serde::Serialize;
use std::sync::Arc;

/// Device block shared by all entities of one meter.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescriptor {
    pub identifiers: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hw_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sw_version: String,
}

/// Sensor discovery payload.
#[derive(Debug, Clone, Serialize)]
pub struct SensorDescriptor {
    pub name: &'static str,
    pub state_topic: String,
    pub value_template: String,
    pub unit_of_measurement: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    pub state_class: &'static str,
    pub object_id: String,
    pub unique_id: String,
    pub force_update: bool,
    pub device: DeviceDescriptor,
}

/// Presentation of one reading in Home Assistant.
struct SensorKind {
    name: &'static str,
    unit: &'static str,
    device_class: Option<&'static str>,
    state_class: &'static str,
}

fn sensor_kind(reading: Reading) -> SensorKind {
    let (name, unit, device_class, state_class) = match reading {
        Reading::PowerConsumption => ("Power consumption", "kWh", Some("energy"), "total"),
        Reading::Frequency => ("Frequency", "Hz", Some("frequency"), "measurement"),
        Reading::Voltage => ("Voltage", "V", Some("voltage"), "measurement"),
        Reading::Current => ("Current", "A", Some("current"), "measurement"),
        Reading::ActivePower => ("Active power", "W", Some("power"), "measurement"),
        Reading::ReactivePower => ("Reactive power", "var", None, "measurement"),
        Reading::FullPower => ("Apparent power", "VA", Some("apparent_power"), "measurement"),
    };
    SensorKind {
        name,
        unit,
        device_class,
        state_class,
    }
}

/// Builds the discovery descriptor for one reading of a meter.
pub fn sensor_descriptor(params: &Params, reading: Reading) -> SensorDescriptor {
    let kind = sensor_kind(reading);
    let object_id = format!(
        "{}_{}",
        params.name.to_lowercase().replace(' ', "_"),
        reading.as_str()
    );

    SensorDescriptor {
        name: kind.name,
        state_topic: params.state_topic.clone(),
        value_template: format!("{{{{ value_json.{} }}}}", json_key(reading)),
        unit_of_measurement: kind.unit,
        device_class: kind.device_class,
        state_class: kind.state_class,
        unique_id: format!("{}_{}", params.uid, object_id),
        object_id,
        force_update: true,
        device: DeviceDescriptor {
            identifiers: vec![params.uid.clone()],
            manufacturer: params.manufacturer.clone(),
            model: params.model.clone(),
            name: params.name.clone(),
            hw_version: params.hw_version.clone(),
            sw_version: params.sw_version.clone(),
        },
    }
}

/// Publishes discovery descriptors for registered meters.
pub struct DiscoveryManager {
    config: HomeAssistantConfig,
    publisher: Arc<dyn Publisher>,
    meters: Vec<Arc<dyn Meter>>,
}

impl DiscoveryManager {
    pub fn new(config: HomeAssistantConfig, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            config,
            publisher,
            meters: Vec::new(),
        }
    }

    pub fn add_meter(&mut self, meter: Arc<dyn Meter>) {
        tracing::debug!(uid = %meter.params().uid, "meter added to discovery");
        self.meters.push(meter);
    }

    /// Returns the discovery topic of one reading of a meter.
    pub fn topic(&self, uid: &str, reading: Reading) -> String {
        format!(
            "{}/sensor/{}/{}/config",
            self.config.prefix,
            reading.as_str().replace('_', "-"),
            uid
        )
    }

    /// Publishes every descriptor. Does nothing unless auto-discovery is on.
    ///
    /// Returns the number of descriptors sent.
    pub async fn run(&self) -> Result<usize, PublishError> {
        if !self.config.auto_discovery {
            tracing::debug!("Home Assistant discovery disabled");
            return Ok(0);
        }

        let mut sent = 0;
        for meter in &self.meters {
            let params = meter.params();
            for reading in params.flags.readings() {
                let topic = self.topic(&params.uid, reading);
                let payload = serde_json::to_vec(&sensor_descriptor(&params, reading))?;
                tracing::debug!(
                    topic = %topic,
                    payload = %String::from_utf8_lossy(&payload),
                    "publish discovery"
                );
                self.publisher.publish(&topic, payload, true).await?;
                sent += 1;
            }
        }

        tracing::info!("Published {} discovery descriptors", sent);
        Ok(sent)
    }
}
