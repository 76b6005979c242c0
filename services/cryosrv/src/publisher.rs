//! Measurement publishing
//!
//! Glue between a poll cycle's raw replies and the two outbound paths:
//! an XML packet on the device's bus topic and a line-protocol row in the
//! time-series store. Either destination may be absent (unconfigured or
//! down); the other still gets the data.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::bus::packet;
use crate::bus::MeasurementBus;
use crate::core::device::{DeviceInstance, DeviceKind, DeviceRegistry};
use crate::protocols::{self, ParsedFields};
use crate::storage::{build_line, InfluxClient};
use crate::transport::ReplySet;

/// Parse every reply from one poll cycle into a single field map.
pub fn parse_replies(kind: DeviceKind, replies: &ReplySet) -> ParsedFields {
    let mut fields = ParsedFields::new();
    for (symbolic, reply) in replies {
        let parsed = protocols::parse_reply(kind, symbolic, &reply.raw);
        fields.extend(parsed);
    }
    fields
}

/// Publish one device's parsed fields to the bus and the store.
pub async fn publish_measurement(
    device: &DeviceInstance,
    fields: &ParsedFields,
    bus: Option<&dyn MeasurementBus>,
    database: Option<&InfluxClient>,
) {
    if fields.is_empty() {
        debug!(tag = %device.tag(), "nothing to publish this cycle");
        return;
    }

    let measurement = device.measurement_name();

    match bus {
        Some(bus) => match packet::build_measurement_packet(&measurement, fields) {
            Ok(xml) => {
                if let Err(err) = bus.publish(&device.brokertopic, &xml).await {
                    warn!(tag = %device.tag(), error = %err, "bus publish failed");
                }
            },
            Err(err) => warn!(tag = %device.tag(), error = %err, "packet build failed"),
        },
        None => debug!(tag = %device.tag(), "no broker attached"),
    }

    match database {
        Some(database) => {
            let mut tags = BTreeMap::new();
            tags.insert("Device".to_string(), device.devtype.as_str().to_string());
            if let Some(line) = build_line(&measurement, &tags, fields) {
                if let Err(err) = database.write_to_table(&device.tablename, &line).await {
                    warn!(tag = %device.tag(), error = %err, "time-series write failed");
                }
            }
        },
        None => debug!(tag = %device.tag(), "no database attached"),
    }
}

/// Broadcast the discovery descriptor for every advertisable device.
///
/// Reflects configured devices regardless of enabled state, but skips the
/// proxy kind and anything flagged internal.
pub async fn advertise(registry: &DeviceRegistry, bus: &dyn MeasurementBus, reply_topic: &str) {
    let mut devices: Vec<&DeviceInstance> = registry
        .iter()
        .map(|(_, device)| device)
        .filter(|device| !device.internal && device.devtype != DeviceKind::LoisGetTempProxy)
        .collect();
    devices.sort_by_key(|device| device.tag());

    match packet::build_advertisement_packet(&devices) {
        Ok(xml) => {
            if let Err(err) = bus.publish(reply_topic, &xml).await {
                warn!(error = %err, "advertisement publish failed");
            } else {
                debug!(count = devices.len(), "advertised device registry");
            }
        },
        Err(err) => warn!(error = %err, "advertisement build failed"),
    }
}
