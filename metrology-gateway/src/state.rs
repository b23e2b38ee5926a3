//! Meter state published on the state topic.

use metrology_meter::Reading;
use serde::Serialize;

/// One snapshot of a meter's readings.
///
/// Readings the meter does not support are left out of the JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_consumption: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reactive_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_power: Option<f64>,
}

impl MeterState {
    pub fn set(&mut self, reading: Reading, value: f64) {
        *self.slot(reading) = Some(value);
    }

    pub fn get(&self, reading: Reading) -> Option<f64> {
        match reading {
            Reading::PowerConsumption => self.power_consumption,
            Reading::Frequency => self.frequency,
            Reading::Voltage => self.voltage,
            Reading::Current => self.current,
            Reading::ActivePower => self.active_power,
            Reading::ReactivePower => self.reactive_power,
            Reading::FullPower => self.full_power,
        }
    }

    fn slot(&mut self, reading: Reading) -> &mut Option<f64> {
        match reading {
            Reading::PowerConsumption => &mut self.power_consumption,
            Reading::Frequency => &mut self.frequency,
            Reading::Voltage => &mut self.voltage,
            Reading::Current => &mut self.current,
            Reading::ActivePower => &mut self.active_power,
            Reading::ReactivePower => &mut self.reactive_power,
            Reading::FullPower => &mut self.full_power,
        }
    }
}

/// Returns the JSON key a reading is published under.
pub fn json_key(reading: Reading) -> &'static str {
    match reading {
        Reading::PowerConsumption => "powerConsumption",
        Reading::Frequency => "frequency",
        Reading::Voltage => "voltage",
        Reading::Current => "current",
        Reading::ActivePower => "activePower",
        Reading::ReactivePower => "reactivePower",
        Reading::FullPower => "fullPower",
    }
}
