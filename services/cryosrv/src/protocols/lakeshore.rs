//! Lake Shore 218 and 325 temperature instruments
//!
//! Serial setup on the bridge: 9600 baud half duplex, 1 start, 7 data,
//! 1 parity, 1 stop, odd parity, CRLF line termination.
//!
//! These units never echo the command back, so the originating symbolic
//! command name must ride along with the raw reply — without it a bare
//! number is ambiguous.
//!
//! On the 325, loop 2 is the one normally used for detector regulation;
//! loop 1 drives a 25 W heater against loop 2's 2 W.

use tracing::warn;

use super::{assign_value_cmd, decode_text, CommandSet, CommandTable, ParsedFields, ValueKind};
use crate::core::device::DeviceKind;
use crate::error::{CryoSrvError, Result};

const TERMINATOR: &str = "\r\n";

const LS218_COMMANDS: &[(&str, &str)] = &[
    ("readall", "KRDG?"),
    ("readohm", "SRDG?"),
];

const LS325_COMMANDS: &[(&str, &str)] = &[
    ("reada", "KRDG?A"),
    ("readb", "KRDG?B"),
    ("readaohm", "SRDG?A"),
    ("readbohm", "SRDG?B"),
    ("getsetp1", "SETP? 1"),
    ("setsetp1", "SETP 1"),
    ("getsetp2", "SETP? 2"),
    ("setsetp2", "SETP 2"),
    ("gethtrpwr1", "HTR? 1"),
    ("gethtr1", "RANGE? 1"),
    ("sethtr1", "RANGE 1"),
    ("gethtrpwr2", "HTR? 2"),
    ("gethtr2", "RANGE? 2"),
    ("sethtr2", "RANGE 2"),
];

/// Positional labels for the 218's eight-sensor replies.
const LS218_SENSOR_LABELS: [&str; 8] = [
    "Sensor1", "Sensor2", "Sensor3", "Sensor4", "Sensor5", "Sensor6", "Sensor7", "Sensor8",
];
const LS218_OHM_LABELS: [&str; 8] = [
    "Resistance1",
    "Resistance2",
    "Resistance3",
    "Resistance4",
    "Resistance5",
    "Resistance6",
    "Resistance7",
    "Resistance8",
];

pub fn all_commands(kind: DeviceKind) -> CommandTable {
    let commands = match kind {
        DeviceKind::Lakeshore218 => LS218_COMMANDS,
        _ => LS325_COMMANDS,
    };
    CommandTable {
        commands,
        terminator: TERMINATOR,
    }
}

/// Default poll set per model.
pub fn default_queries(kind: DeviceKind) -> CommandSet {
    let table = all_commands(kind);
    let picks: &[(&str, &str)] = match kind {
        DeviceKind::Lakeshore218 => &[
            ("SensorTemps", "readall"),
            ("SensorTempsOhms", "readohm"),
        ],
        _ => &[
            ("SensorTempA", "reada"),
            ("SensorTempB", "readb"),
            ("SensorTempAOhm", "readaohm"),
            ("SensorTempBOhm", "readbohm"),
            ("Setpoint1", "getsetp1"),
            ("Setpoint2", "getsetp2"),
            ("Heater1", "gethtrpwr1"),
            ("Heater2", "gethtrpwr2"),
        ],
    };

    let mut set = CommandSet::new();
    for (field, key) in picks {
        if let Some(wire) = table.wire(key) {
            set.insert((*field).to_string(), wire);
        }
    }
    set
}

/// Resolve a remote command, formatting the value when one is given.
///
/// Heater ranges are enumerated: loop 1 takes `high|low|off` (2|1|0),
/// loop 2 is a 2 W loop with only `on|off` (1|0).
pub fn remote_command(kind: DeviceKind, command: &str, value: Option<&str>) -> Result<CommandSet> {
    if value.is_none() && command.eq_ignore_ascii_case("readall") {
        return Ok(default_queries(kind));
    }

    let table = all_commands(kind);
    let base = table
        .get(command)
        .ok_or_else(|| CryoSrvError::unknown_command(kind.as_str(), command))?;

    let wire = match value {
        None => format!("{base}{TERMINATOR}"),
        Some(raw) => match command.to_ascii_lowercase().as_str() {
            "setsetp1" | "setsetp2" => {
                assign_value_cmd(base, raw, TERMINATOR, ValueKind::Float, ',')?
            },
            "sethtr1" => {
                let mapped = match raw.to_ascii_lowercase().as_str() {
                    "high" => 2,
                    "low" => 1,
                    "off" => 0,
                    _ => {
                        return Err(CryoSrvError::invalid_argument(format!(
                            "{raw:?} is not one of high|low|off for sethtr1"
                        )))
                    },
                };
                assign_value_cmd(base, &mapped.to_string(), TERMINATOR, ValueKind::Int, ',')?
            },
            "sethtr2" => {
                let mapped = match raw.to_ascii_lowercase().as_str() {
                    "on" => 1,
                    "off" => 0,
                    _ => {
                        return Err(CryoSrvError::invalid_argument(format!(
                            "{raw:?} is not one of on|off for sethtr2"
                        )))
                    },
                };
                assign_value_cmd(base, &mapped.to_string(), TERMINATOR, ValueKind::Int, ',')?
            },
            _ => {
                return Err(CryoSrvError::invalid_argument(format!(
                    "{command} does not take a value"
                )))
            },
        },
    };

    let mut set = CommandSet::new();
    set.insert(command.to_string(), wire);
    Ok(set)
}

/// Parse a reply given the symbolic command that produced it.
pub fn parse(kind: DeviceKind, symbolic: &str, raw: &[u8]) -> ParsedFields {
    let mut fields = ParsedFields::new();
    let Some(text) = decode_text(raw) else {
        return fields;
    };
    let trimmed = text.trim();

    match kind {
        DeviceKind::Lakeshore218 => {
            // Eight comma-separated values, tagged positionally so a
            // scrambled map ordering downstream cannot mislabel a sensor.
            let labels: &[&str; 8] = match symbolic.to_ascii_lowercase().as_str() {
                "sensortemps" => &LS218_SENSOR_LABELS,
                "sensortempsohms" => &LS218_OHM_LABELS,
                other => {
                    warn!("unknown LS218 reply for command {other:?}");
                    return fields;
                },
            };
            let values: Vec<&str> = trimmed.split(',').collect();
            if values.len() != labels.len() {
                warn!(
                    command = symbolic,
                    "LS218 reply has {} values, expected {}: {trimmed:?}",
                    values.len(),
                    labels.len()
                );
                return fields;
            }
            for (label, value) in labels.iter().zip(values) {
                match value.trim().parse::<f64>() {
                    Ok(parsed) => {
                        fields.insert((*label).to_string(), parsed);
                    },
                    Err(err) => {
                        warn!(error = %err, "bad LS218 value {value:?}; dropping whole reply");
                        fields.clear();
                        return fields;
                    },
                }
            }
        },
        _ => {
            // Every 325 query is single-valued; the field takes the
            // symbolic command's name.
            match trimmed.parse::<f64>() {
                Ok(parsed) => {
                    fields.insert(symbolic.to_string(), parsed);
                },
                Err(err) => warn!(
                    error = %err,
                    command = symbolic,
                    "LS325 reply did not parse: {trimmed:?}"
                ),
            }
        },
    }

    fields
}
