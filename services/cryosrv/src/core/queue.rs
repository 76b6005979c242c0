//! Inbound command queue
//!
//! The single bridge between the bus listener task and the main polling
//! loop. The listener inserts; the main loop snapshots-and-clears once per
//! scheduler pass. Nothing else is shared between the two sides, so this
//! mutex is the only lock in the concurrency story.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::bus::packet::CommandRequest;

/// One remote command, timestamped at arrival.
///
/// Owned exclusively by the queue until drained; afterwards it is a plain
/// local value with no further identity.
#[derive(Debug, Clone)]
pub struct InboundCommand {
    pub cmd_id: String,
    pub instrument: String,
    pub devicetype: String,
    pub tag: Option<String>,
    pub command: String,
    pub argument: Option<String>,
    /// Wall-clock arrival time, for operator-facing diagnostics
    pub enqueued_utc: DateTime<Utc>,
    /// Monotonic arrival time, for residency arithmetic
    enqueued_at: Instant,
}

impl InboundCommand {
    /// Build from a decoded packet, generating a `cmd_id` when the producer
    /// failed to send one.
    pub fn from_request(request: CommandRequest) -> Self {
        let cmd_id = request
            .cmd_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            cmd_id,
            instrument: request.instrument,
            devicetype: request.devicetype,
            tag: request.tag,
            command: request.command,
            argument: request.argument,
            enqueued_utc: Utc::now(),
            enqueued_at: Instant::now(),
        }
    }

    /// How long the command has been sitting in the queue.
    pub fn residency(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Thread-safe FIFO-ish store keyed by `cmd_id`.
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: Mutex<HashMap<String, InboundCommand>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a command; a duplicate `cmd_id` replaces the earlier entry.
    pub fn insert(&self, command: InboundCommand) {
        let mut queue = self.inner.lock();
        queue.insert(command.cmd_id.clone(), command);
    }

    /// Atomically snapshot and clear the queue.
    ///
    /// A command arriving mid-drain lands in the fresh map and shows up in
    /// the next drain — never lost, never double-processed. The batch is
    /// returned in arrival order.
    pub fn drain(&self) -> Vec<InboundCommand> {
        let snapshot = {
            let mut queue = self.inner.lock();
            std::mem::take(&mut *queue)
        };

        let mut batch: Vec<InboundCommand> = snapshot.into_values().collect();
        batch.sort_by_key(|cmd| cmd.enqueued_at);
        for command in &batch {
            debug!(
                cmd_id = %command.cmd_id,
                command = %command.command,
                residency_ms = command.residency().as_millis() as u64,
                "drained command"
            );
        }
        batch
    }

    /// Number of commands currently waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request(cmd_id: Option<&str>, command: &str) -> CommandRequest {
        CommandRequest {
            cmd_id: cmd_id.map(str::to_string),
            instrument: "nihts".to_string(),
            devicetype: "cryocooler-gen2".to_string(),
            tag: None,
            command: command.to_string(),
            argument: None,
        }
    }

    #[test]
    fn drain_returns_exactly_what_was_inserted() {
        let queue = CommandQueue::new();
        for i in 0..5 {
            queue.insert(InboundCommand::from_request(request(None, &format!("cmd{i}"))));
        }
        assert_eq!(queue.len(), 5);

        let batch = queue.drain();
        assert_eq!(batch.len(), 5);
        assert!(queue.is_empty());
        // No duplicates.
        let mut ids: Vec<&str> = batch.iter().map(|c| c.cmd_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn missing_cmd_id_gets_generated() {
        let a = InboundCommand::from_request(request(None, "advertise"));
        let b = InboundCommand::from_request(request(None, "advertise"));
        assert_ne!(a.cmd_id, b.cmd_id);
    }

    #[test]
    fn duplicate_cmd_id_replaces() {
        let queue = CommandQueue::new();
        queue.insert(InboundCommand::from_request(request(Some("x1"), "queryenable")));
        queue.insert(InboundCommand::from_request(request(Some("x1"), "querydisable")));
        let batch = queue.drain();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].command, "querydisable");
    }

    #[test]
    fn batch_preserves_arrival_order() {
        let queue = CommandQueue::new();
        for name in ["first", "second", "third"] {
            queue.insert(InboundCommand::from_request(request(Some(name), name)));
            std::thread::sleep(Duration::from_millis(2));
        }
        let order: Vec<String> = queue.drain().into_iter().map(|c| c.command).collect();
        assert_eq!(order, ["first", "second", "third"]);
    }

    #[test]
    fn insert_during_drain_lands_in_next_batch() {
        let queue = Arc::new(CommandQueue::new());
        for i in 0..100 {
            queue.insert(InboundCommand::from_request(request(
                Some(&format!("pre{i}")),
                "queryenable",
            )));
        }

        let inserter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..100 {
                    queue.insert(InboundCommand::from_request(request(
                        Some(&format!("mid{i}")),
                        "querydisable",
                    )));
                }
            })
        };

        let first = queue.drain();
        inserter.join().unwrap();
        let second = queue.drain();

        // Nothing lost, nothing duplicated, regardless of where the
        // concurrent inserts landed.
        assert_eq!(first.len() + second.len(), 200);
        let mut ids: Vec<String> = first
            .iter()
            .chain(second.iter())
            .map(|c| c.cmd_id.clone())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert!(queue.is_empty());
    }

    #[test]
    fn residency_is_nonnegative_and_grows() {
        let command = InboundCommand::from_request(request(None, "advertise"));
        let first = command.residency();
        std::thread::sleep(Duration::from_millis(5));
        assert!(command.residency() >= first);
    }
}
