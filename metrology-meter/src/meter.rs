//! Meter capability traits and descriptors.

use crate::error::MeterError;
use async_trait::async_trait;
use std::fmt;

/// A quantity an electricity meter can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reading {
    PowerConsumption,
    Frequency,
    Voltage,
    Current,
    ActivePower,
    ReactivePower,
    FullPower,
}

impl Reading {
    /// Every reading, in publishing order.
    pub const ALL: [Reading; 7] = [
        Reading::PowerConsumption,
        Reading::Frequency,
        Reading::Voltage,
        Reading::Current,
        Reading::ActivePower,
        Reading::ReactivePower,
        Reading::FullPower,
    ];

    /// Returns the snake_case name used in topics and ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Reading::PowerConsumption => "power_consumption",
            Reading::Frequency => "frequency",
            Reading::Voltage => "voltage",
            Reading::Current => "current",
            Reading::ActivePower => "active_power",
            Reading::ReactivePower => "reactive_power",
            Reading::FullPower => "full_power",
        }
    }

    /// Returns the capability flag advertising this reading.
    pub fn flag(&self) -> u64 {
        match self {
            Reading::PowerConsumption => MeterFlags::POWER_CONSUMPTION,
            Reading::Frequency => MeterFlags::FREQUENCY,
            Reading::Voltage => MeterFlags::VOLTAGE,
            Reading::Current => MeterFlags::CURRENT,
            Reading::ActivePower => MeterFlags::ACTIVE_POWER,
            Reading::ReactivePower => MeterFlags::REACTIVE_POWER,
            Reading::FullPower => MeterFlags::FULL_POWER,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of readings a meter supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeterFlags(u64);

impl MeterFlags {
    pub const POWER_CONSUMPTION: u64 = 1 << 0;
    pub const FREQUENCY: u64 = 1 << 1;
    pub const VOLTAGE: u64 = 1 << 2;
    pub const CURRENT: u64 = 1 << 3;
    pub const ACTIVE_POWER: u64 = 1 << 4;
    pub const REACTIVE_POWER: u64 = 1 << 5;
    pub const FULL_POWER: u64 = 1 << 6;

    const ALL_MASK: u64 = 0x7F;

    pub fn new() -> Self {
        Self(0)
    }

    /// Every reading.
    pub fn all() -> Self {
        Self(Self::ALL_MASK)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self(bits & Self::ALL_MASK)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn with(mut self, reading: Reading) -> Self {
        self.0 |= reading.flag();
        self
    }

    pub fn supports(&self, reading: Reading) -> bool {
        self.0 & reading.flag() != 0
    }

    /// Iterates the supported readings in publishing order.
    pub fn readings(&self) -> impl Iterator<Item = Reading> + '_ {
        Reading::ALL.into_iter().filter(|r| self.supports(*r))
    }
}

/// Static description of a meter, known after `init`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    /// Stable identifier, unique per device.
    pub uid: String,
    /// Topic the meter state is published on.
    pub state_topic: String,
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    pub hw_version: String,
    pub sw_version: String,
    pub flags: MeterFlags,
}

/// A device that can be identified and initialized.
#[async_trait]
pub trait Meter: Send + Sync {
    /// Queries the device and fills in its parameters.
    async fn init(&self) -> Result<(), MeterError>;

    /// Returns the parameters. Empty until `init` succeeded.
    fn params(&self) -> Params;
}

/// An electricity meter.
///
/// Every reading defaults to [`MeterError::Unsupported`]; callers consult
/// [`Params::flags`] before asking.
#[async_trait]
pub trait ElectricMeter: Meter {
    /// Total consumed energy, kWh.
    async fn power_consumption(&self) -> Result<f64, MeterError> {
        Err(MeterError::Unsupported(Reading::PowerConsumption))
    }

    /// Mains frequency, Hz.
    async fn frequency(&self) -> Result<f64, MeterError> {
        Err(MeterError::Unsupported(Reading::Frequency))
    }

    /// Voltage, V.
    async fn voltage(&self) -> Result<f64, MeterError> {
        Err(MeterError::Unsupported(Reading::Voltage))
    }

    /// Current, A.
    async fn current(&self) -> Result<f64, MeterError> {
        Err(MeterError::Unsupported(Reading::Current))
    }

    /// Active power, W.
    async fn active_power(&self) -> Result<f64, MeterError> {
        Err(MeterError::Unsupported(Reading::ActivePower))
    }

    /// Reactive power, var.
    async fn reactive_power(&self) -> Result<f64, MeterError> {
        Err(MeterError::Unsupported(Reading::ReactivePower))
    }

    /// Apparent power, VA.
    async fn full_power(&self) -> Result<f64, MeterError> {
        Err(MeterError::Unsupported(Reading::FullPower))
    }

    /// Reads one quantity by kind.
    async fn read(&self, reading: Reading) -> Result<f64, MeterError> {
        match reading {
            Reading::PowerConsumption => self.power_consumption().await,
            Reading::Frequency => self.frequency().await,
            Reading::Voltage => self.voltage().await,
            Reading::Current => self.current().await,
            Reading::ActivePower => self.active_power().await,
            Reading::ReactivePower => self.reactive_power().await,
            Reading::FullPower => self.full_power().await,
        }
    }
}

/// Rounds to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
