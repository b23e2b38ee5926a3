//! metrology-master - Pulsar meter gateway
//!
//! Polls electricity meters on RS-485 buses and publishes their readings to
//! an MQTT broker, optionally announcing them to Home Assistant.

use clap::Parser;
use metrology_gateway::{
    meters, BoxError, Config, DiscoveryManager, LogFormat, MqttPublisher, Publisher, Scheduler,
    SchedulerConfig, ServiceGroup, UpdateMeterJob,
};
use metrology_meter::Meter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "metrology-master")]
#[command(version, about = "Pulsar meter to MQTT gateway")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "METROLOGY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    // Load configuration (from file if given, then env overrides)
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    match config.log.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    if let Some(path) = &args.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting metrology-master");
    tracing::info!("  MQTT broker: {}:{}", config.mqtt.host, config.mqtt.port);
    tracing::info!(
        "  Poll period: {}s (request timeout {}ms)",
        config.poll.period_secs,
        config.poll.request_timeout_ms
    );

    // Open one shared connection per serial port
    let connections = meters::open_ports(&config).await?;

    let (publisher, eventloop) = MqttPublisher::new(&config.mqtt);
    let publisher: Arc<dyn Publisher> = Arc::new(publisher);

    let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
        period: config.poll.period(),
        run_immediately: config.poll.run_immediately,
    }));
    let mut discovery = DiscoveryManager::new(config.home_assistant.clone(), publisher.clone());

    let group = ServiceGroup::new();
    group.start(eventloop.run(group.token()));

    for (name, meter) in meters::build_meters(&config, &connections)? {
        if let Err(e) = meter.init().await {
            tracing::error!("Failed to initialize meter {}: {}", name, e);
            group.shutdown().await;
            let _ = group.wait().await;
            return Err(e.into());
        }
        tracing::info!("  Meter {}: {}", name, meter.params().name);

        scheduler.add_job(Arc::new(UpdateMeterJob::new(
            name,
            meter.clone(),
            publisher.clone(),
        )))?;
        discovery.add_meter(meter);
    }

    group.start(async move {
        discovery.run().await?;
        Ok::<(), BoxError>(())
    });
    group.serve(scheduler);
    group.listen_os(config.grace_period());

    let result = group.wait().await;

    for (port, conn) in connections {
        if let Err(e) = conn.close().await {
            tracing::warn!("Failed to close port {}: {}", port, e);
        }
    }

    match result {
        Ok(()) => {
            tracing::info!("Gateway stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Gateway stopped with error: {}", e);
            Err(e)
        }
    }
}
