//! Main loop
//!
//! Single-threaded cooperative driver: run due polling jobs, drain the
//! inbound command queue, process the batch, nap in sub-second chunks.
//! Nothing in here runs concurrently with itself, so the registry and
//! scheduler need no locks; the bus event loop only ever touches the
//! command queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::MeasurementBus;
use crate::compat::UpfileSink;
use crate::config::ServiceConfig;
use crate::core::device::{DeviceInstance, DeviceKind, DeviceRegistry};
use crate::core::processor;
use crate::core::queue::CommandQueue;
use crate::core::scheduler::{FailurePolicy, PollScheduler};
use crate::error::Result;
use crate::protocols;
use crate::publisher;
use crate::storage::InfluxClient;
use crate::transport::{self, TransportSettings};

/// Live connection handles, resolved once at startup. Devices hold only
/// the lookup keys; the handles themselves live (and die) here.
pub struct Connections {
    pub brokers: HashMap<String, Arc<dyn MeasurementBus>>,
    pub databases: HashMap<String, Arc<InfluxClient>>,
    /// Broker key carrying the command/reply topics
    pub queue_broker: String,
}

impl Connections {
    pub fn broker_for(&self, key: &str) -> Option<&dyn MeasurementBus> {
        self.brokers.get(key).map(|bus| bus.as_ref() as &dyn MeasurementBus)
    }

    pub fn database_for(&self, key: &str) -> Option<&InfluxClient> {
        self.databases.get(key).map(|db| db.as_ref())
    }
}

/// The polling daemon's state and loop.
pub struct Runtime {
    registry: DeviceRegistry,
    scheduler: PollScheduler,
    queue: Arc<CommandQueue>,
    connections: Connections,
    reply_topic: String,
    transport: TransportSettings,
    failure_policy: FailurePolicy,
    nap: Duration,
    proxy_command: String,
    compat: Option<UpfileSink>,
}

impl Runtime {
    pub fn new(config: &ServiceConfig, connections: Connections, queue: Arc<CommandQueue>) -> Self {
        let mut registry = DeviceRegistry::new();
        for device in &config.devices {
            registry.insert(device.clone());
        }

        let compat = config
            .compat
            .as_ref()
            .filter(|compat| compat.enabled)
            .map(|compat| UpfileSink::new(compat.path.clone(), compat.instrument.clone()));
        if let Some(compat_cfg) = &config.compat {
            if !compat_cfg.enabled {
                info!("compatibility sink configured but disabled");
            }
        }

        Self {
            registry,
            scheduler: PollScheduler::new(config.runtime.stagger()),
            queue,
            connections,
            reply_topic: config.queue.reply_topic.clone(),
            transport: config.runtime.transport(),
            failure_policy: config.runtime.failure_policy,
            nap: config.runtime.nap(),
            proxy_command: config.runtime.proxy_command.clone(),
            compat,
        }
    }

    /// Register a recurring job for every enabled device.
    ///
    /// Registration order is sorted by tag so the staggered first fires
    /// are stable across restarts.
    pub fn register_enabled_devices(&mut self) {
        let mut enabled: Vec<(String, u64)> = self
            .registry
            .iter()
            .filter(|(_, device)| device.enabled)
            .map(|(tag, device)| (tag.clone(), device.queryinterval))
            .collect();
        enabled.sort();

        for (tag, interval) in enabled {
            self.scheduler.register(&tag, Duration::from_secs(interval));
        }
        info!(
            scheduled = self.scheduler.len(),
            configured = self.registry.len(),
            "initial schedule assembled"
        );
    }

    /// Semi-infinite loop; exits when the token trips.
    ///
    /// An in-flight transport call is never aborted — it runs to its own
    /// timeout and the loop exits at the next boundary.
    pub async fn run(&mut self, token: CancellationToken) {
        info!("entering main loop");
        while !token.is_cancelled() {
            self.run_due_jobs().await;
            self.process_queue().await;

            // Nap up to a second, in chunks, staying responsive to both
            // shutdown and newly due jobs.
            for _ in 0..4 {
                if token.is_cancelled() {
                    break;
                }
                tokio::time::sleep(self.nap).await;
                self.run_due_jobs().await;
            }
        }
        info!("main loop exited");
    }

    /// One scheduler pass: run everything that has come due.
    pub async fn run_due_jobs(&mut self) {
        for tag in self.scheduler.due(Instant::now()) {
            let Some(device) = self.registry.get(&tag).cloned() else {
                warn!(tag = %tag, "job for unknown device; cancelling");
                self.scheduler.cancel(&tag);
                continue;
            };
            // Second gate behind the immediate cancel-on-disable: a stale
            // job body must still not poll a disabled device.
            if !device.enabled {
                debug!(tag = %tag, "device disabled; skipping tick");
                continue;
            }

            if let Err(err) = self.poll_device(&device).await {
                match self.failure_policy {
                    FailurePolicy::LeaveScheduled => {
                        warn!(tag = %tag, error = %err, "poll failed; job remains scheduled");
                    },
                    FailurePolicy::Cancel => {
                        error!(tag = %tag, error = %err, "poll failed; cancelling job");
                        self.scheduler.cancel(&tag);
                    },
                }
            }
        }
    }

    /// One poll cycle: query, parse, publish, feed the compat sink.
    async fn poll_device(&mut self, device: &DeviceInstance) -> Result<()> {
        // The proxy kind never touches the serial transport: its poll is
        // a bus publish, and the reply comes back through the listener.
        if device.devtype == DeviceKind::LoisGetTempProxy {
            if let Some(bus) = self.connections.broker_for(&device.broker) {
                bus.publish(&device.brokertopic, &self.proxy_command).await?;
            } else {
                warn!(tag = %device.tag(), "proxy device has no broker attached");
            }
            return Ok(());
        }

        let commands = protocols::default_query_commands(device.devtype)?;
        let replies =
            transport::round_trip(&device.devhost, device.devport, &commands, self.transport)
                .await?;
        let fields = publisher::parse_replies(device.devtype, &replies);

        publisher::publish_measurement(
            device,
            &fields,
            self.connections.broker_for(&device.broker),
            self.connections.database_for(&device.database),
        )
        .await;

        if let Some(compat) = &mut self.compat {
            if !fields.is_empty() && compat.applies_to(device) {
                compat.update(device, &fields, Utc::now());
                compat.write();
            }
        }

        Ok(())
    }

    /// Drain the queue and apply the batch.
    pub async fn process_queue(&mut self) {
        let batch = self.queue.drain();
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), pending = self.queue.len(), "processing drained commands");
        processor::process_batch(
            batch,
            &mut self.registry,
            &mut self.scheduler,
            &self.connections,
            &self.reply_topic,
            self.transport,
        )
        .await;
    }

    /// Diagnostic snapshot of the schedule for periodic logging.
    pub fn schedule_summary(&self) -> Vec<(String, Duration)> {
        let now = Instant::now();
        let mut jobs: Vec<(String, Duration)> = self
            .scheduler
            .jobs()
            .map(|job| {
                (
                    job.tag.clone(),
                    job.next_fire.saturating_duration_since(now),
                )
            })
            .collect();
        jobs.sort_by_key(|(_, remaining)| *remaining);
        jobs
    }
}
