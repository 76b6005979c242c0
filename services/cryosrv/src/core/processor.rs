//! Queue processor
//!
//! Interprets each drained inbound command against the live device
//! registry. This is the only code that mutates devices at runtime, and it
//! runs on the main loop, so mutation is race-free by construction.
//!
//! The generic keyword set is deliberately closed: `advertise`,
//! `queryenable`, `querydisable`, `devicehost`, `deviceport`. Anything
//! else is offered to the per-family command dispatcher as an on-demand
//! device query; a miss there means the command is dropped with a warning.

use std::time::Duration;

use tracing::{info, warn};

use crate::core::device::{device_tag, DeviceRegistry};
use crate::core::queue::InboundCommand;
use crate::core::scheduler::PollScheduler;
use crate::error::CryoSrvError;
use crate::protocols;
use crate::publisher;
use crate::runtime::Connections;
use crate::transport::{self, TransportSettings};

/// Apply every command from one drain, in order.
pub async fn process_batch(
    batch: Vec<InboundCommand>,
    registry: &mut DeviceRegistry,
    scheduler: &mut PollScheduler,
    connections: &Connections,
    reply_topic: &str,
    transport_settings: TransportSettings,
) {
    for command in batch {
        info!(
            cmd_id = %command.cmd_id,
            command = %command.command,
            residency_ms = command.residency().as_millis() as u64,
            "processing inbound command"
        );
        apply(
            &command,
            registry,
            scheduler,
            connections,
            reply_topic,
            transport_settings,
        )
        .await;
    }
}

/// Apply one inbound command. Never errors: every failure mode is a
/// warning and a dropped command, so one bad producer cannot wedge the
/// loop.
pub async fn apply(
    command: &InboundCommand,
    registry: &mut DeviceRegistry,
    scheduler: &mut PollScheduler,
    connections: &Connections,
    reply_topic: &str,
    transport_settings: TransportSettings,
) {
    let keyword = command.command.to_ascii_lowercase();

    // Discovery does not address a specific device.
    if keyword == "advertise" {
        match connections.broker_for(&connections.queue_broker) {
            Some(bus) => publisher::advertise(registry, bus, reply_topic).await,
            None => warn!("advertise requested but the queue broker is not connected"),
        }
        return;
    }

    let tag = device_tag(
        &command.instrument,
        &command.devicetype,
        command.tag.as_deref(),
    );

    match keyword.as_str() {
        "queryenable" | "querydisable" => {
            let enable = keyword == "queryenable";
            let Some(device) = registry.get_mut(&tag) else {
                warn_unknown_destination(&tag, command);
                return;
            };
            device.enabled = enable;
            let interval = Duration::from_secs(device.queryinterval);
            // Immediate scheduling effect: the job table changes now, not
            // at the next tick's early-exit check.
            if enable {
                scheduler.register(&tag, interval);
            } else {
                scheduler.cancel(&tag);
            }
            info!(tag = %tag, enabled = enable, "device enable flag updated");
        },
        "devicehost" | "deviceport" => {
            let Some(argument) = command.argument.as_deref() else {
                warn!(tag = %tag, command = %keyword, "command requires an argument; dropped");
                return;
            };
            let Some(device) = registry.get_mut(&tag) else {
                warn_unknown_destination(&tag, command);
                return;
            };
            if keyword == "devicehost" {
                device.devhost = argument.to_string();
            } else {
                match argument.parse::<u16>() {
                    Ok(port) => device.devport = port,
                    Err(_) => {
                        warn!(
                            tag = %tag,
                            argument,
                            "port is not a valid u16; device unchanged"
                        );
                        return;
                    },
                }
            }
            info!(tag = %tag, command = %keyword, argument, "device connectivity updated");
            // Transport details changed: cancel and recreate the job so
            // the next fire binds the new endpoint.
            if device.enabled {
                let interval = Duration::from_secs(device.queryinterval);
                scheduler.cancel(&tag);
                scheduler.register(&tag, interval);
            }
        },
        _ => {
            // Family-specific remote command, routed through the dispatcher.
            let Some(device) = registry.get(&tag).cloned() else {
                warn_unknown_destination(&tag, command);
                return;
            };
            let commands = match protocols::remote_query(
                device.devtype,
                &command.command,
                command.argument.as_deref(),
            ) {
                Ok(commands) => commands,
                Err(CryoSrvError::UnknownCommand { devtype, command }) => {
                    warn!(tag = %tag, devtype, command, "unknown command keyword; dropped");
                    return;
                },
                Err(err) => {
                    warn!(tag = %tag, error = %err, "command dropped; device unchanged");
                    return;
                },
            };

            match transport::round_trip(
                &device.devhost,
                device.devport,
                &commands,
                transport_settings,
            )
            .await
            {
                Ok(replies) => {
                    let fields = publisher::parse_replies(device.devtype, &replies);
                    publisher::publish_measurement(
                        &device,
                        &fields,
                        connections.broker_for(&device.broker),
                        connections.database_for(&device.database),
                    )
                    .await;
                },
                Err(err) => {
                    warn!(tag = %tag, error = %err, "on-demand query failed");
                },
            }
        },
    }
}

fn warn_unknown_destination(tag: &str, command: &InboundCommand) {
    warn!(
        tag = %tag,
        command = %command.command,
        "inbound command references an unconfigured device; dropped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::packet::CommandRequest;
    use crate::bus::RecordingBus;
    use crate::core::device::{DeviceInstance, DeviceKind};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn cooler() -> DeviceInstance {
        DeviceInstance {
            instrument: "nihts".to_string(),
            devtype: DeviceKind::CryocoolerGen2,
            extratag: Some("benchcooler".to_string()),
            devhost: "cooler-bridge".to_string(),
            devport: 10001,
            queryinterval: 60,
            enabled: true,
            database: "primary".to_string(),
            broker: "primary".to_string(),
            brokertopic: "cryo.nihts.cooler".to_string(),
            tablename: "cryo".to_string(),
            internal: false,
        }
    }

    fn command(name: &str, argument: Option<&str>) -> InboundCommand {
        InboundCommand::from_request(CommandRequest {
            cmd_id: None,
            instrument: "nihts".to_string(),
            devicetype: "cryocooler-gen2".to_string(),
            tag: Some("benchcooler".to_string()),
            command: name.to_string(),
            argument: argument.map(str::to_string),
        })
    }

    fn harness() -> (DeviceRegistry, PollScheduler, Connections, Arc<RecordingBus>) {
        let mut registry = DeviceRegistry::new();
        let tag = registry.insert(cooler());
        let mut scheduler = PollScheduler::new(Duration::ZERO);
        scheduler.register(&tag, Duration::from_secs(60));

        let bus: Arc<RecordingBus> = Arc::default();
        let mut brokers: HashMap<String, Arc<dyn crate::bus::MeasurementBus>> = HashMap::new();
        brokers.insert("primary".to_string(), bus.clone());
        let connections = Connections {
            brokers,
            databases: HashMap::new(),
            queue_broker: "primary".to_string(),
        };
        (registry, scheduler, connections, bus)
    }

    fn fast() -> TransportSettings {
        TransportSettings {
            connect_timeout: Duration::from_millis(50),
            write_timeout: Duration::from_millis(50),
            read_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn disable_then_enable_restores_without_touching_connectivity() {
        let (mut registry, mut scheduler, connections, _bus) = harness();
        let tag = "nihts+cryocooler-gen2+benchcooler";

        apply(&command("querydisable", None), &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;
        assert!(!registry.get(tag).unwrap().enabled);
        assert!(!scheduler.contains(tag));

        apply(&command("queryenable", None), &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;
        let device = registry.get(tag).unwrap();
        assert!(device.enabled);
        assert!(scheduler.contains(tag));
        // Connectivity and cadence survive the round trip untouched.
        assert_eq!(device.devhost, "cooler-bridge");
        assert_eq!(device.devport, 10001);
        assert_eq!(device.queryinterval, 60);
    }

    #[tokio::test]
    async fn host_change_reschedules() {
        let (mut registry, mut scheduler, connections, _bus) = harness();
        let tag = "nihts+cryocooler-gen2+benchcooler";

        apply(&command("devicehost", Some("new-bridge")), &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;
        assert_eq!(registry.get(tag).unwrap().devhost, "new-bridge");
        assert!(scheduler.contains(tag));
    }

    #[tokio::test]
    async fn bad_port_leaves_device_unchanged() {
        let (mut registry, mut scheduler, connections, _bus) = harness();
        let tag = "nihts+cryocooler-gen2+benchcooler";

        apply(&command("deviceport", Some("70000")), &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;
        assert_eq!(registry.get(tag).unwrap().devport, 10001);

        apply(&command("deviceport", Some("10002")), &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;
        assert_eq!(registry.get(tag).unwrap().devport, 10002);
    }

    #[tokio::test]
    async fn unknown_destination_never_panics_and_later_commands_work() {
        let (mut registry, mut scheduler, connections, bus) = harness();

        let stray = InboundCommand::from_request(CommandRequest {
            cmd_id: None,
            instrument: "deveny".to_string(),
            devicetype: "lakeshore218".to_string(),
            tag: None,
            command: "querydisable".to_string(),
            argument: None,
        });
        apply(&stray, &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;

        // A valid command after the dropped one still processes.
        apply(&command("advertise", None), &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;
        assert_eq!(bus.published.lock().len(), 1);
    }

    #[tokio::test]
    async fn unknown_keyword_is_dropped() {
        let (mut registry, mut scheduler, connections, bus) = harness();
        apply(&command("frobnicate", None), &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;
        assert!(bus.published.lock().is_empty());
        assert!(registry.get("nihts+cryocooler-gen2+benchcooler").unwrap().enabled);
    }

    #[tokio::test]
    async fn invalid_family_argument_leaves_device_state() {
        let (mut registry, mut scheduler, connections, bus) = harness();
        // "stop" takes on|off; "sideways" must be dropped before any
        // transport attempt.
        apply(&command("stop", Some("sideways")), &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;
        assert!(bus.published.lock().is_empty());
    }

    #[tokio::test]
    async fn advertise_publishes_to_reply_topic() {
        let (mut registry, mut scheduler, connections, bus) = harness();
        apply(&command("advertise", None), &mut registry, &mut scheduler, &connections, "cryo.reply", fast()).await;
        let published = bus.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "cryo.reply");
        assert!(published[0].1.contains("cryocooler-gen2"));
    }
}
