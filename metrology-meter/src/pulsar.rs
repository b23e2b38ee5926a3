//! Pulsar single-phase electricity meter.

use crate::error::MeterError;
use crate::meter::{round2, ElectricMeter, Meter, MeterFlags, Params};
use async_trait::async_trait;
use metrology_client::PulsarClient;
use metrology_protocol::Address;
use parking_lot::RwLock;

/// Configuration `type` selecting this driver.
pub const TYPE: &str = "pulsar_electro";

const MANUFACTURER: &str = "Тепловодохран";
const MODEL: &str = "Пульсар";

/// Channel mask covering both tariff counters.
const CHANNEL_MASK: u32 = 0xFFFF;
const CHANNEL_T1: usize = 0;
const CHANNEL_T2: usize = 12;

const PARAM_FREQUENCY: u16 = 0x0100;
const PARAM_VOLTAGE: u16 = 0x010A;
const PARAM_CURRENT: u16 = 0x010B;
const PARAM_ACTIVE_POWER: u16 = 0x010C;
const PARAM_REACTIVE_POWER: u16 = 0x010D;
const PARAM_FULL_POWER: u16 = 0x010E;
const PARAM_MODEL: u16 = 0x016C;

/// Pulsar electricity meter at one bus address.
pub struct PulsarElectro {
    address: Address,
    client: PulsarClient,
    params: RwLock<Params>,
}

impl PulsarElectro {
    pub fn new(address: Address, client: PulsarClient) -> Self {
        Self {
            address,
            client,
            params: RwLock::new(Params::default()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn read_u16(&self, index: u16, what: &'static str) -> Result<u16, MeterError> {
        let data = self.client.read_param(self.address, index).await?;
        if data.len() < 2 {
            return Err(MeterError::InvalidResponse {
                what,
                len: data.len(),
                expected: 2,
            });
        }
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    async fn read_u32(&self, index: u16, what: &'static str) -> Result<u32, MeterError> {
        let data = self.client.read_param(self.address, index).await?;
        if data.len() < 4 {
            return Err(MeterError::InvalidResponse {
                what,
                len: data.len(),
                expected: 4,
            });
        }
        Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
    }
}

#[async_trait]
impl Meter for PulsarElectro {
    async fn init(&self) -> Result<(), MeterError> {
        let uid = self.address.to_string();

        let version = self.client.version(self.address).await?;
        let descriptor = self.client.read_param(self.address, PARAM_MODEL).await?;
        let model = model_name(&descriptor)?;

        tracing::info!(
            uid = %uid,
            model = %model,
            sw_version = %version.software,
            hw_version = %version.hardware,
            "meter initialized"
        );

        *self.params.write() = Params {
            state_topic: format!("power-meter/{}/state", uid),
            uid,
            manufacturer: MANUFACTURER.to_string(),
            name: format!("{} {}", MANUFACTURER, model),
            model,
            hw_version: version.hardware,
            sw_version: version.software,
            flags: MeterFlags::all(),
        };
        Ok(())
    }

    fn params(&self) -> Params {
        self.params.read().clone()
    }
}

#[async_trait]
impl ElectricMeter for PulsarElectro {
    async fn power_consumption(&self) -> Result<f64, MeterError> {
        let channels = self.client.read_channels(self.address, CHANNEL_MASK).await?;
        if channels.len() <= CHANNEL_T2 {
            return Err(MeterError::InvalidResponse {
                what: "channels",
                len: channels.len() * 4,
                expected: (CHANNEL_T2 + 1) * 4,
            });
        }
        let t1 = channels[CHANNEL_T1] as f64 / 100.0;
        let t2 = channels[CHANNEL_T2] as f64 / 100.0;
        Ok(round2(t1 + t2))
    }

    async fn frequency(&self) -> Result<f64, MeterError> {
        let raw = self.read_u16(PARAM_FREQUENCY, "frequency").await?;
        Ok(round2(raw as f64 / 100.0))
    }

    async fn voltage(&self) -> Result<f64, MeterError> {
        let raw = self.read_u16(PARAM_VOLTAGE, "voltage").await?;
        Ok(round2(raw as f64 / 100.0))
    }

    async fn current(&self) -> Result<f64, MeterError> {
        let raw = self.read_u32(PARAM_CURRENT, "current").await?;
        Ok(round2(raw as f64 / 1000.0))
    }

    async fn active_power(&self) -> Result<f64, MeterError> {
        Ok(self.read_u16(PARAM_ACTIVE_POWER, "active power").await? as f64)
    }

    async fn reactive_power(&self) -> Result<f64, MeterError> {
        Ok(self.read_u16(PARAM_REACTIVE_POWER, "reactive power").await? as f64)
    }

    async fn full_power(&self) -> Result<f64, MeterError> {
        Ok(self.read_u16(PARAM_FULL_POWER, "full power").await? as f64)
    }
}

/// Builds the model name from the model descriptor parameter.
///
/// Unknown fields are logged and left out of the name.
fn model_name(data: &[u8]) -> Result<String, MeterError> {
    if data.len() < 8 {
        return Err(MeterError::InvalidResponse {
            what: "model descriptor",
            len: data.len(),
            expected: 8,
        });
    }

    let mut parts = vec![MODEL];

    let fields: [(&str, u8, fn(u8) -> Option<&'static str>); 5] = [
        ("model id", data[7], model_variant),
        ("accuracy class", data[6], accuracy_class),
        ("current limits", data[5], current_limits),
        ("connection type", data[4], connection_type),
        ("case type", data[1], case_type),
    ];

    for (field, value, lookup) in fields {
        match lookup(value) {
            Some("") => {}
            Some(part) => parts.push(part),
            None => tracing::warn!("unsupported {} {}", field, value),
        }
    }

    Ok(parts.join(" "))
}

fn model_variant(v: u8) -> Option<&'static str> {
    match v {
        0 => Some("Т1"),
        2 => Some("Т1Т"),
        _ => None,
    }
}

fn accuracy_class(v: u8) -> Option<&'static str> {
    match v {
        0 => Some("1А"),
        _ => None,
    }
}

fn current_limits(v: u8) -> Option<&'static str> {
    match v {
        0 => Some("5_60"),
        1 => Some("5_80"),
        2 => Some("10_80"),
        3 => Some("10_100"),
        _ => None,
    }
}

fn connection_type(v: u8) -> Option<&'static str> {
    match v {
        // Built-in optical port only
        0 => Some(""),
        1 => Some("RS-485"),
        2 => Some("MBus"),
        3 => Some("IoT"),
        4 => Some("PLC"),
        5 => Some("OPTO"),
        6 => Some("GSM"),
        _ => None,
    }
}

fn case_type(v: u8) -> Option<&'static str> {
    match v {
        0 => Some("DIN"),
        1 => Some("UNIVERSAL"),
        2 => Some("PLANE"),
        3 => Some("COM"),
        _ => None,
    }
}
