//! Device wire protocols
//!
//! Per-family command tables and reply parsers for the supported hardware
//! catalog, plus the dispatch layer that the scheduler and the remote
//! command path share. A command table maps a symbolic name (e.g.
//! `coldtip`) to the literal wire fragment for that family; the default
//! query set is the deliberately small subset sent on every scheduled tick
//! so slow serial links are not saturated with diagnostic-only traffic.
//!
//! Parsers fail soft: malformed or undecodable replies produce an empty
//! field map and a warning, never an error that could take down a polling
//! job.

pub mod lakeshore;
pub mod mks;
pub mod newport;
pub mod sunpower;

use std::collections::BTreeMap;

use tracing::warn;

use crate::core::device::DeviceKind;
use crate::error::{CryoSrvError, Result};

/// Symbolic name -> ready-to-write wire command (terminator included).
pub type CommandSet = BTreeMap<String, String>;

/// Output field name -> numeric value, the unit handed to the publisher.
pub type ParsedFields = BTreeMap<String, f64>;

/// Immutable per-family command catalog.
///
/// Values are wire fragments without the terminator; callers append it when
/// building a ready-to-write set.
#[derive(Debug, Clone, Copy)]
pub struct CommandTable {
    pub commands: &'static [(&'static str, &'static str)],
    pub terminator: &'static str,
}

impl CommandTable {
    /// Look up a bare wire fragment by symbolic name.
    pub fn get(&self, name: &str) -> Option<&'static str> {
        self.commands
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, cmd)| *cmd)
    }

    /// One ready-to-write command (terminator appended).
    pub fn wire(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|cmd| format!("{}{}", cmd, self.terminator))
    }
}

/// Full command catalog for a device family.
///
/// Fails with `UnknownDeviceKind` for the proxy kind, which has no serial
/// table at all; never returns a partial map.
pub fn all_commands(kind: DeviceKind) -> Result<CommandTable> {
    match kind {
        DeviceKind::VacuumGaugeMks972b => Ok(mks::all_commands()),
        DeviceKind::CryocoolerGen1 | DeviceKind::CryocoolerGen2 => Ok(sunpower::all_commands(kind)),
        DeviceKind::Lakeshore218 | DeviceKind::Lakeshore325 => Ok(lakeshore::all_commands(kind)),
        DeviceKind::NewportIthx | DeviceKind::NewportIsdtc => Ok(newport::all_commands(kind)),
        DeviceKind::LoisGetTempProxy => {
            Err(CryoSrvError::UnknownDeviceKind(kind.as_str().to_string()))
        },
    }
}

/// Default poll set for a device family, every value ready to write.
pub fn default_query_commands(kind: DeviceKind) -> Result<CommandSet> {
    match kind {
        DeviceKind::VacuumGaugeMks972b => Ok(mks::default_queries()),
        DeviceKind::CryocoolerGen1 | DeviceKind::CryocoolerGen2 => {
            Ok(sunpower::default_queries(kind))
        },
        DeviceKind::Lakeshore218 | DeviceKind::Lakeshore325 => Ok(lakeshore::default_queries(kind)),
        DeviceKind::NewportIthx | DeviceKind::NewportIsdtc => Ok(newport::default_queries(kind)),
        DeviceKind::LoisGetTempProxy => {
            Err(CryoSrvError::UnknownDeviceKind(kind.as_str().to_string()))
        },
    }
}

/// Resolve an arbitrary named command for on-demand remote invocation.
///
/// Covers the full family catalog, not just the default poll set. Fails
/// with `UnknownCommand` when the name is not in the family table and
/// `InvalidArgument` when a value-bearing command gets a value that does
/// not coerce or is outside its enumerated set.
pub fn remote_query(kind: DeviceKind, command: &str, value: Option<&str>) -> Result<CommandSet> {
    match kind {
        DeviceKind::VacuumGaugeMks972b => mks::remote_command(command),
        DeviceKind::CryocoolerGen1 | DeviceKind::CryocoolerGen2 => {
            sunpower::remote_command(kind, command, value)
        },
        DeviceKind::Lakeshore218 | DeviceKind::Lakeshore325 => {
            lakeshore::remote_command(kind, command, value)
        },
        DeviceKind::NewportIthx | DeviceKind::NewportIsdtc => {
            newport::remote_command(kind, command)
        },
        DeviceKind::LoisGetTempProxy => {
            Err(CryoSrvError::unknown_command(kind.as_str(), command))
        },
    }
}

/// Parse one raw reply for one symbolic command into output fields.
///
/// The Lake Shore units never echo, so the originating symbolic name is
/// required to disambiguate; the other families carry enough structure in
/// the reply itself.
pub fn parse_reply(kind: DeviceKind, symbolic: &str, raw: &[u8]) -> ParsedFields {
    match kind {
        DeviceKind::VacuumGaugeMks972b => mks::parse(symbolic, raw),
        DeviceKind::CryocoolerGen1 | DeviceKind::CryocoolerGen2 => sunpower::parse(raw),
        DeviceKind::Lakeshore218 | DeviceKind::Lakeshore325 => {
            lakeshore::parse(kind, symbolic, raw)
        },
        DeviceKind::NewportIthx | DeviceKind::NewportIsdtc => newport::parse(symbolic, raw),
        DeviceKind::LoisGetTempProxy => {
            warn!("proxy device replies arrive via the bus listener, not the parser");
            ParsedFields::new()
        },
    }
}

/// Decode raw transport bytes as text, or warn and yield nothing.
pub(crate) fn decode_text(raw: &[u8]) -> Option<String> {
    match std::str::from_utf8(raw) {
        Ok(text) if !text.is_empty() => Some(text.to_string()),
        Ok(_) => {
            warn!("empty reply from device");
            None
        },
        Err(err) => {
            warn!(error = %err, "reply bytes are not valid text: {:?}", raw);
            None
        },
    }
}

/// Numeric coercion expected by a value-bearing command.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ValueKind {
    Float,
    Int,
}

/// Format a set-type command: `<base><sep><value><term>`.
///
/// Floats are written with three decimals, which is what every controller
/// in the catalog accepts.
pub(crate) fn assign_value_cmd(
    base: &str,
    raw: &str,
    terminator: &str,
    kind: ValueKind,
    sep: char,
) -> Result<String> {
    match kind {
        ValueKind::Float => {
            let value: f64 = raw.trim().parse().map_err(|_| {
                CryoSrvError::invalid_argument(format!("{raw:?} is not a number for {base:?}"))
            })?;
            Ok(format!("{base}{sep}{value:.3}{terminator}"))
        },
        ValueKind::Int => {
            let value: i64 = raw.trim().parse().map_err(|_| {
                CryoSrvError::invalid_argument(format!("{raw:?} is not an integer for {base:?}"))
            })?;
            Ok(format!("{base}{sep}{value}{terminator}"))
        },
    }
}
