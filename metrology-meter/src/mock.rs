//! In-memory meter for tests.

use crate::error::MeterError;
use crate::meter::{ElectricMeter, Meter, MeterFlags, Params, Reading};
use async_trait::async_trait;
use metrology_client::ClientError;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A meter returning preset values.
///
/// Readings without a preset value fail as if the device stopped answering.
pub struct MockMeter {
    params: Params,
    values: Mutex<HashMap<Reading, f64>>,
    reads: Mutex<Vec<Reading>>,
}

impl MockMeter {
    /// Creates a meter with `uid` advertising `flags`.
    pub fn new(uid: &str, flags: MeterFlags) -> Self {
        Self {
            params: Params {
                uid: uid.to_string(),
                state_topic: format!("power-meter/{}/state", uid),
                manufacturer: "Test".to_string(),
                model: "Mock".to_string(),
                name: format!("Test Mock {}", uid),
                hw_version: "1.0".to_string(),
                sw_version: "1.0".to_string(),
                flags,
            },
            values: Mutex::new(HashMap::new()),
            reads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_value(self, reading: Reading, value: f64) -> Self {
        self.values.lock().insert(reading, value);
        self
    }

    pub fn set_value(&self, reading: Reading, value: f64) {
        self.values.lock().insert(reading, value);
    }

    /// Returns the readings requested so far, in order.
    pub fn reads(&self) -> Vec<Reading> {
        self.reads.lock().clone()
    }

    fn value(&self, reading: Reading) -> Result<f64, MeterError> {
        self.reads.lock().push(reading);
        if !self.params.flags.supports(reading) {
            return Err(MeterError::Unsupported(reading));
        }
        self.values
            .lock()
            .get(&reading)
            .copied()
            .ok_or(MeterError::Client(ClientError::DeviceNotResponding))
    }
}

#[async_trait]
impl Meter for MockMeter {
    async fn init(&self) -> Result<(), MeterError> {
        Ok(())
    }

    fn params(&self) -> Params {
        self.params.clone()
    }
}

#[async_trait]
impl ElectricMeter for MockMeter {
    async fn read(&self, reading: Reading) -> Result<f64, MeterError> {
        self.value(reading)
    }

    async fn power_consumption(&self) -> Result<f64, MeterError> {
        self.value(Reading::PowerConsumption)
    }

    async fn frequency(&self) -> Result<f64, MeterError> {
        self.value(Reading::Frequency)
    }

    async fn voltage(&self) -> Result<f64, MeterError> {
        self.value(Reading::Voltage)
    }

    async fn current(&self) -> Result<f64, MeterError> {
        self.value(Reading::Current)
    }

    async fn active_power(&self) -> Result<f64, MeterError> {
        self.value(Reading::ActivePower)
    }

    async fn reactive_power(&self) -> Result<f64, MeterError> {
        self.value(Reading::ReactivePower)
    }

    async fn full_power(&self) -> Result<f64, MeterError> {
        self.value(Reading::FullPower)
    }
}
