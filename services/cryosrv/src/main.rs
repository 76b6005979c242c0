//! Cooling telemetry and control daemon
//!
//! Bootstrap order: arguments, configuration, logging, banner, connection
//! setup (time-series clients, then brokers with their listeners), then
//! the main loop until a termination signal arrives.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};

use common::logging::LogConfig;
use common::{print_startup_banner, shutdown_token, ServiceInfo};
use cryosrv::bus::listener::{LegacyTopic, ListenerRouter};
use cryosrv::bus::{MeasurementBus, MqttBus};
use cryosrv::config::ServiceConfig;
use cryosrv::core::CommandQueue;
use cryosrv::runtime::{Connections, Runtime};
use cryosrv::storage::InfluxClient;

#[derive(Parser, Debug)]
#[command(name = "cryosrv", about = "Instrument cooling telemetry and control service")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config/cryosrv.toml", env = "CRYOSRV_CONFIG")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ServiceConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let log_config = LogConfig {
        service_name: config.service.name.clone(),
        log_dir: config.logging.dir.clone(),
        console_level: Level::from_str(&config.logging.level).unwrap_or(Level::INFO),
        file_level: Level::DEBUG,
    };
    let _log_guard = common::logging::init_with_config(&log_config)?;

    let service_info = ServiceInfo::new(&config.service.name, &config.service.description);
    print_startup_banner(&service_info);

    if args.validate {
        info!("configuration validated successfully");
        return Ok(());
    }

    // Time-series clients first; the listeners need them for the legacy
    // telemetry mirrors.
    let mut databases: HashMap<String, Arc<InfluxClient>> = HashMap::new();
    for (key, db) in &config.databases {
        databases.insert(
            key.clone(),
            Arc::new(InfluxClient::new(&db.url, &db.org, &db.bucket, &db.token)),
        );
    }

    let queue = Arc::new(CommandQueue::new());

    // One connection per configured broker. Only the queue broker carries
    // the command topic; legacy mirrors ride on whichever broker their
    // topic belongs to (they are keyed here per queue broker for now).
    let mut brokers: HashMap<String, Arc<dyn MeasurementBus>> = HashMap::new();
    let mut mqtt_handles = Vec::new();
    for (key, broker_config) in &config.brokers {
        let command_topic = if *key == config.queue.broker {
            Some(config.queue.cmd_topic.clone())
        } else {
            None
        };

        let mut legacy = HashMap::new();
        if *key == config.queue.broker {
            for topic in &config.legacy_topics {
                legacy.insert(
                    topic.topic.clone(),
                    LegacyTopic {
                        measurement: topic.measurement.clone(),
                        device_label: topic.device_label.clone(),
                        database: databases.get(&topic.database).cloned(),
                    },
                );
            }
        }

        let router = ListenerRouter::new(command_topic, queue.clone(), legacy);
        let bus = MqttBus::connect(broker_config, router)
            .await
            .with_context(|| format!("connecting broker {key}"))?;
        mqtt_handles.push(bus.clone());
        brokers.insert(key.clone(), bus);
        info!(broker = %key, host = %broker_config.host, "broker connection started");
    }

    let connections = Connections {
        brokers,
        databases,
        queue_broker: config.queue.broker.clone(),
    };

    let mut runtime = Runtime::new(&config, connections, queue);
    runtime.register_enabled_devices();

    let token = shutdown_token();
    runtime.run(token).await;

    // The loop has finished its final iteration; part from the brokers
    // cleanly so in-flight publishes flush.
    for bus in mqtt_handles {
        bus.disconnect().await;
    }
    info!("shutdown complete");

    Ok(())
}
