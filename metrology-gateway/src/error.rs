//! Gateway error types.

use crate::config::ConfigError;
use metrology_client::ClientError;
use metrology_meter::MeterError;
use thiserror::Error;

/// Boxed error carried by routines and services in a service group.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors while publishing to the broker.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from one job execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("meter error: {0}")]
    Meter(#[from] MeterError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
}

/// Gateway startup errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("meter error: {0}")]
    Meter(#[from] MeterError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("meter {meter:?}: port {port:?} is not configured")]
    UnknownPort { meter: String, port: String },

    #[error("meter {meter:?}: unsupported meter type {kind:?}")]
    UnsupportedMeter { meter: String, kind: String },

    #[error("meter {meter:?}: invalid address {address:?}")]
    InvalidAddress { meter: String, address: String },
}
