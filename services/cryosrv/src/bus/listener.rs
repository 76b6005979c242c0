//! Inbound message routing
//!
//! Runs on the bus event-loop task. Two inbound shapes exist: command
//! packets, which are decoded and pushed onto the shared queue for the
//! main loop to drain, and legacy free-text telemetry mirrors, which are
//! parsed and written straight to the time-series store from here — they
//! are not commands and need no draining step.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::packet;
use crate::core::queue::{CommandQueue, InboundCommand};
use crate::protocols::ParsedFields;
use crate::storage::{build_line, InfluxClient};

/// One legacy telemetry topic and where its parsed fields land.
#[derive(Debug, Clone)]
pub struct LegacyTopic {
    pub measurement: String,
    pub device_label: String,
    pub database: Option<Arc<InfluxClient>>,
}

/// Routes inbound publishes by topic name.
///
/// `command_topic` is `None` on brokers that only carry outbound
/// measurements; those subscribe to nothing beyond their legacy mirrors.
pub struct ListenerRouter {
    command_topic: Option<String>,
    queue: Arc<CommandQueue>,
    legacy: HashMap<String, LegacyTopic>,
}

impl ListenerRouter {
    pub fn new(
        command_topic: Option<String>,
        queue: Arc<CommandQueue>,
        legacy: HashMap<String, LegacyTopic>,
    ) -> Self {
        Self {
            command_topic,
            queue,
            legacy,
        }
    }

    /// Every topic this router needs subscribed.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.command_topic.iter().cloned().collect();
        topics.extend(self.legacy.keys().cloned());
        topics
    }

    /// Handle one inbound publish.
    ///
    /// Never errors: a malformed payload costs a warning, not the
    /// listener task.
    pub async fn route(&self, topic: &str, payload: &str) {
        if self.command_topic.as_deref() == Some(topic) {
            match packet::parse_command_packet(payload) {
                Ok(request) => {
                    let command = InboundCommand::from_request(request);
                    debug!(cmd_id = %command.cmd_id, command = %command.command, "queued command");
                    self.queue.insert(command);
                },
                Err(err) => {
                    warn!(topic, error = %err, "discarding unparseable command packet");
                },
            }
            return;
        }

        if let Some(legacy) = self.legacy.get(topic) {
            let fields = parse_legacy_temps(payload);
            if fields.is_empty() {
                debug!(topic, "legacy message carried no parseable fields");
                return;
            }
            let Some(database) = &legacy.database else {
                warn!(topic, "legacy topic has no database attached");
                return;
            };
            let mut tags = std::collections::BTreeMap::new();
            tags.insert("Device".to_string(), legacy.device_label.clone());
            if let Some(line) = build_line(&legacy.measurement, &tags, &fields) {
                if let Err(err) = database.write_line_protocol(&line).await {
                    warn!(topic, error = %err, "legacy telemetry write failed");
                }
            }
            return;
        }

        debug!(topic, "ignoring message on unrouted topic");
    }
}

/// Pull float-valued `key=value` tokens out of a free-text log body.
///
/// The source logs interleave prose with instrument readouts; anything
/// that is not a clean numeric assignment is skipped. Garbage in, empty
/// map out — never an error.
pub fn parse_legacy_temps(body: &str) -> ParsedFields {
    let mut fields = ParsedFields::new();
    for line in body.lines() {
        for token in line.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                continue;
            }
            if let Ok(parsed) = value.trim_end_matches(',').parse::<f64>() {
                fields.insert(key.to_string(), parsed);
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_parser_extracts_numeric_assignments() {
        let body = "12:03:44 detector readout ok DetTemp=-110.25 BaseTemp=23.4,\nnote: warm";
        let fields = parse_legacy_temps(body);
        assert_eq!(fields.len(), 2);
        assert!((fields["DetTemp"] + 110.25).abs() < 1e-9);
        assert!((fields["BaseTemp"] - 23.4).abs() < 1e-9);
    }

    #[test]
    fn legacy_parser_ignores_garbage() {
        assert!(parse_legacy_temps("no assignments here").is_empty());
        assert!(parse_legacy_temps("mode=auto state=idle").is_empty());
        assert!(parse_legacy_temps("").is_empty());
        // Weird keys are skipped, clean ones survive.
        let fields = parse_legacy_temps("?!=1.0 Temp=77.0");
        assert_eq!(fields.len(), 1);
    }

    #[tokio::test]
    async fn command_packets_land_in_queue() {
        let queue = Arc::new(CommandQueue::new());
        let router = ListenerRouter::new(Some("cryo.cmd".to_string()), queue.clone(), HashMap::new());

        let request = packet::CommandRequest {
            cmd_id: Some("q1".to_string()),
            instrument: "nihts".to_string(),
            devicetype: "cryocooler-gen2".to_string(),
            tag: None,
            command: "advertise".to_string(),
            argument: None,
        };
        let xml = packet::build_command_packet(&request).unwrap();

        router.route("cryo.cmd", &xml).await;
        assert_eq!(queue.len(), 1);

        // Bad payloads are dropped without touching the queue.
        router.route("cryo.cmd", "<CryoPacket>truncated").await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn unrouted_topics_are_ignored() {
        let queue = Arc::new(CommandQueue::new());
        let router = ListenerRouter::new(Some("cryo.cmd".to_string()), queue.clone(), HashMap::new());
        router.route("some.other.topic", "whatever").await;
        assert!(queue.is_empty());
    }
}
