//! Serial-bridge transport
//!
//! The devices hang off TCP-to-serial bridges, one socket per device, with
//! no authentication or encryption on the link — trusted network only. A
//! connection is opened for one poll's command batch and dropped right
//! after, so a flaky bridge can never leave a stale socket wedged across
//! cycles.
//!
//! "Read until idle" is the only end-of-reply signal these protocols give
//! us: bytes are collected until the link stays quiet for the read timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{CryoSrvError, Result};
use crate::protocols::CommandSet;

/// Raw bytes plus the UTC stamp taken right after the command was written.
#[derive(Debug, Clone)]
pub struct QueryReply {
    pub raw: Vec<u8>,
    pub stamp: DateTime<Utc>,
}

/// Symbolic command name -> reply for one poll cycle. Consumed immediately
/// by the parsers; never persisted.
pub type ReplySet = BTreeMap<String, QueryReply>;

/// Transport timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Send a command batch to one device and collect the raw replies.
///
/// Commands are written strictly one at a time; each reply is read to idle
/// before the next command goes out, because the bridges interleave badly
/// when pipelined.
pub async fn round_trip(
    host: &str,
    port: u16,
    commands: &CommandSet,
    settings: TransportSettings,
) -> Result<ReplySet> {
    let endpoint = format!("{host}:{port}");
    let mut stream = timeout(settings.connect_timeout, TcpStream::connect(&endpoint))
        .await
        .map_err(|_| CryoSrvError::transport(format!("connect to {endpoint} timed out")))?
        .map_err(|err| CryoSrvError::transport(format!("connect to {endpoint}: {err}")))?;

    let mut replies = ReplySet::new();

    for (name, wire) in commands {
        timeout(settings.write_timeout, stream.write_all(wire.as_bytes()))
            .await
            .map_err(|_| CryoSrvError::transport(format!("write to {endpoint} timed out")))?
            .map_err(|err| CryoSrvError::transport(format!("write to {endpoint}: {err}")))?;

        // Stamp right after the write so the timestamp brackets the
        // device's conversion, not our read loop.
        let stamp = Utc::now();

        let raw = read_until_idle(&mut stream, settings.read_timeout).await?;
        debug!(command = %name, bytes = raw.len(), "received reply from {endpoint}");
        if raw.is_empty() {
            warn!(command = %name, "no response from {endpoint}");
        }

        replies.insert(name.clone(), QueryReply { raw, stamp });
    }

    Ok(replies)
}

/// Collect bytes until the link stays quiet for `idle` or the peer closes.
async fn read_until_idle(stream: &mut TcpStream, idle: Duration) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        match timeout(idle, stream.read(&mut chunk)).await {
            // Peer closed; whatever we have is the reply.
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
            Ok(Err(err)) => {
                return Err(CryoSrvError::transport(format!("read failed: {err}")));
            },
            // Quiet past the timeout: reply complete.
            Err(_) => break,
        }
    }

    Ok(buffer)
}
