//! # metrology-gateway
//!
//! Polling gateway for Pulsar meters.
//!
//! This crate provides:
//! - YAML + environment configuration
//! - A periodic job scheduler
//! - A service group with graceful shutdown
//! - MQTT state publishing and Home Assistant discovery

pub mod config;
pub mod discovery;
pub mod error;
pub mod grace;
pub mod job;
pub mod meters;
pub mod publish;
pub mod scheduler;
pub mod state;

pub use config::{Config, ConfigError, LogFormat};
pub use discovery::DiscoveryManager;
pub use error::{BoxError, GatewayError, JobError, PublishError, SchedulerError};
pub use grace::{Service, ServiceGroup};
pub use job::UpdateMeterJob;
pub use publish::{MqttEventLoop, MqttPublisher, Publisher};
pub use scheduler::{Job, Scheduler, SchedulerConfig};
pub use state::MeterState;
