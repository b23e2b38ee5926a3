//! Meter construction from configuration.

use crate::config::Config;
use crate::error::GatewayError;
use metrology_client::{Connection, ConnectionConfig, PulsarClient, Transport};
use metrology_meter::{pulsar, PulsarElectro};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Opens one connection per serial port referenced by a meter.
pub async fn open_ports(
    config: &Config,
) -> Result<BTreeMap<String, Arc<Connection>>, GatewayError> {
    let conn_config = ConnectionConfig::default().with_request_timeout(config.poll.request_timeout());

    let mut connections = BTreeMap::new();
    for meter in config.meters.values() {
        if connections.contains_key(&meter.port) {
            continue;
        }
        let Some(serial) = config.serial.get(&meter.port) else {
            continue;
        };

        let transport = Transport::open(serial).await?;
        tracing::info!("  Port {}: {}", meter.port, serial.port);
        connections.insert(
            meter.port.clone(),
            Connection::open(transport, conn_config.clone()),
        );
    }
    Ok(connections)
}

/// Builds every configured meter on its port's shared connection.
pub fn build_meters(
    config: &Config,
    connections: &BTreeMap<String, Arc<Connection>>,
) -> Result<Vec<(String, Arc<PulsarElectro>)>, GatewayError> {
    let mut meters = Vec::with_capacity(config.meters.len());
    for (name, meter) in &config.meters {
        if meter.kind != pulsar::TYPE {
            return Err(GatewayError::UnsupportedMeter {
                meter: name.clone(),
                kind: meter.kind.clone(),
            });
        }

        let conn = connections
            .get(&meter.port)
            .ok_or_else(|| GatewayError::UnknownPort {
                meter: name.clone(),
                port: meter.port.clone(),
            })?;
        let address = meter.address().map_err(|_| GatewayError::InvalidAddress {
            meter: name.clone(),
            address: meter.address.clone(),
        })?;

        let client = PulsarClient::new(Arc::clone(conn));
        meters.push((name.clone(), Arc::new(PulsarElectro::new(address, client))));
    }
    Ok(meters)
}
