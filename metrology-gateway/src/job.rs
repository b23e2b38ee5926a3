//! Meter polling job.

use crate::error::JobError;
use crate::publish::Publisher;
use crate::scheduler::Job;
use crate::state::MeterState;
use async_trait::async_trait;
use metrology_meter::ElectricMeter;
use std::sync::Arc;

/// Reads every supported quantity of a meter and publishes the state.
pub struct UpdateMeterJob {
    name: String,
    meter: Arc<dyn ElectricMeter>,
    publisher: Arc<dyn Publisher>,
}

impl UpdateMeterJob {
    pub fn new(
        name: impl Into<String>,
        meter: Arc<dyn ElectricMeter>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            name: name.into(),
            meter,
            publisher,
        }
    }

    /// Reads the meter without publishing.
    pub async fn read_state(&self) -> Result<MeterState, JobError> {
        let params = self.meter.params();
        let mut state = MeterState::default();
        for reading in params.flags.readings() {
            let value = self.meter.read(reading).await?;
            state.set(reading, value);
        }
        Ok(state)
    }
}

#[async_trait]
impl Job for UpdateMeterJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Result<(), JobError> {
        let state = self.read_state().await?;
        let topic = self.meter.params().state_topic;
        let payload = serde_json::to_vec(&state).map_err(crate::error::PublishError::from)?;

        tracing::debug!(
            topic = %topic,
            payload = %String::from_utf8_lossy(&payload),
            "publish state"
        );
        self.publisher.publish(&topic, payload, false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::memory::MemoryPublisher;
    use metrology_meter::mock::MockMeter;
    use metrology_meter::{MeterError, MeterFlags, Reading};
    use serde_json::json;

    #[tokio::test]
    async fn test_publishes_supported_readings() {
        let meter = Arc::new(
            MockMeter::new(
                "0x00000001",
                MeterFlags::new()
                    .with(Reading::PowerConsumption)
                    .with(Reading::Voltage),
            )
            .with_value(Reading::PowerConsumption, 12.34)
            .with_value(Reading::Voltage, 229.9)
            .with_value(Reading::Current, 5.0),
        );
        let publisher = Arc::new(MemoryPublisher::default());
        let job = UpdateMeterJob::new("kitchen", meter.clone(), publisher.clone());

        assert_eq!(job.name(), "kitchen");
        job.execute().await.unwrap();

        let messages = publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "power-meter/0x00000001/state");
        assert!(!messages[0].retain);
        assert_eq!(
            messages[0].json(),
            json!({ "powerConsumption": 12.34, "voltage": 229.9 })
        );
        assert_eq!(
            meter.reads(),
            vec![Reading::PowerConsumption, Reading::Voltage]
        );
    }

    #[tokio::test]
    async fn test_read_failure_publishes_nothing() {
        let meter = Arc::new(
            MockMeter::new("0x00000002", MeterFlags::all())
                .with_value(Reading::PowerConsumption, 1.0),
        );
        let publisher = Arc::new(MemoryPublisher::default());
        let job = UpdateMeterJob::new("garage", meter, publisher.clone());

        let err = job.execute().await.unwrap_err();
        assert!(matches!(err, JobError::Meter(MeterError::Client(_))));
        assert!(publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_each_execution_publishes_fresh_values() {
        let meter = Arc::new(
            MockMeter::new("0x00000003", MeterFlags::new().with(Reading::Frequency))
                .with_value(Reading::Frequency, 50.0),
        );
        let publisher = Arc::new(MemoryPublisher::default());
        let job = UpdateMeterJob::new("hall", meter.clone(), publisher.clone());

        job.execute().await.unwrap();
        meter.set_value(Reading::Frequency, 49.95);
        job.execute().await.unwrap();

        let messages = publisher.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].json(), json!({ "frequency": 50.0 }));
        assert_eq!(messages[1].json(), json!({ "frequency": 49.95 }));
    }
}
