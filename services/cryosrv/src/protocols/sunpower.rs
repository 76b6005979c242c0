//! CryoTel-style cryocooler controllers
//!
//! Serial setup on the bridge: 4800 baud, 8 data, 1 stop, no parity, CR
//! line termination. A gen 1 controller has less functionality than a
//! gen 2 — notably there is no way to read the actual/measured power —
//! so the gen 1 table is a strict subset.
//!
//! The protocol is echo-based: the first reply line repeats the issued
//! command and routes the rest of the parse.

use tracing::warn;

use super::{assign_value_cmd, decode_text, CommandSet, CommandTable, ParsedFields, ValueKind};
use crate::core::device::DeviceKind;
use crate::error::{CryoSrvError, Result};

const TERMINATOR: &str = "\r";

const GEN1_COMMANDS: &[(&str, &str)] = &[
    ("coldtip", "TC"),
    ("target", "SET TTARGET"),
    ("cmdpower", "E"),
];

const GEN2_COMMANDS: &[(&str, &str)] = &[
    ("coldtip", "TC"),
    ("target", "SET TTARGET"),
    ("cmdpower", "E"),
    ("state", "STATE"),
    ("mpower", "P"),
    ("stop", "SET SSTOP"),
    ("stopmode", "SET SSTOPM"),
    ("minpwr", "SET MIN"),
    ("maxpwr", "SET MAX"),
];

pub fn all_commands(kind: DeviceKind) -> CommandTable {
    let commands = match kind {
        DeviceKind::CryocoolerGen2 => GEN2_COMMANDS,
        _ => GEN1_COMMANDS,
    };
    CommandTable {
        commands,
        terminator: TERMINATOR,
    }
}

/// Default poll set per generation.
pub fn default_queries(kind: DeviceKind) -> CommandSet {
    let table = all_commands(kind);
    let picks: &[(&str, &str)] = match kind {
        DeviceKind::CryocoolerGen2 => &[
            ("CoolerState", "state"),
            ("ColdTip", "coldtip"),
            ("PowerMeasured", "mpower"),
            ("PowerCommanded", "cmdpower"),
        ],
        _ => &[
            ("ColdTip", "coldtip"),
            ("TargetTemp", "target"),
            ("PowerCommanded", "cmdpower"),
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
/// The stop/stopmode values are confusingly inverted on the controller
/// side: `stopmode enable` (allow software stop) writes 0 and `stop on`
/// (actually stop the cooler) writes 1.
pub fn remote_command(kind: DeviceKind, command: &str, value: Option<&str>) -> Result<CommandSet> {
    let table = all_commands(kind);
    let base = table
        .get(command)
        .ok_or_else(|| CryoSrvError::unknown_command(kind.as_str(), command))?;

    let wire = match value {
        // No value given: plain query, immediate shortcut.
        None => format!("{base}{TERMINATOR}"),
        Some(raw) => match command.to_ascii_lowercase().as_str() {
            "target" | "minpwr" | "maxpwr" => {
                assign_value_cmd(base, raw, TERMINATOR, ValueKind::Float, '=')?
            },
            "stopmode" => {
                let mapped = match raw.to_ascii_lowercase().as_str() {
                    "enable" => 0,
                    "disable" => 1,
                    _ => {
                        return Err(CryoSrvError::invalid_argument(format!(
                            "{raw:?} is not one of enable|disable for stopmode"
                        )))
                    },
                };
                assign_value_cmd(base, &mapped.to_string(), TERMINATOR, ValueKind::Int, '=')?
            },
            "stop" => {
                let mapped = match raw.to_ascii_lowercase().as_str() {
                    "on" => 1,
                    "off" => 0,
                    _ => {
                        return Err(CryoSrvError::invalid_argument(format!(
                            "{raw:?} is not one of on|off for stop"
                        )))
                    },
                };
                assign_value_cmd(base, &mapped.to_string(), TERMINATOR, ValueKind::Int, '=')?
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

/// Parse a cooler reply, routing on the echoed command in the first line.
pub fn parse(raw: &[u8]) -> ParsedFields {
    let mut fields = ParsedFields::new();
    let Some(text) = decode_text(raw) else {
        return fields;
    };

    // First line is the echo; the trailing terminator leaves an empty
    // final split entry that gets skipped with it.
    let mut lines = text.split("\r\n");
    let Some(echo) = lines.next() else {
        return fields;
    };
    let body: Vec<&str> = lines.filter(|line| !line.is_empty()).collect();

    let echo_lc = echo.trim().to_ascii_lowercase();
    match echo_lc.as_str() {
        "state" => {
            for line in &body {
                let Some((key, value)) = line.split_once('=') else {
                    warn!("cooler state line without '=': {line:?}");
                    continue;
                };
                match value.trim().parse::<f64>() {
                    Ok(parsed) => {
                        fields.insert(key.trim().to_string(), parsed);
                    },
                    Err(err) => warn!(error = %err, "bad cooler state value in {line:?}"),
                }
            }
        },
        "tc" => parse_single(&body, "ColdTipTemp", &mut fields),
        "p" => parse_single(&body, "ActualPower", &mut fields),
        "e" => {
            // Ordered triple: max, min, commanded.
            let labels = ["MaxPower", "MinPower", "CommandedPower"];
            for (label, line) in labels.iter().zip(body.iter()) {
                match line.trim().parse::<f64>() {
                    Ok(parsed) => {
                        fields.insert((*label).to_string(), parsed);
                    },
                    Err(err) => warn!(error = %err, "bad cooler power value in {line:?}"),
                }
            }
        },
        _ if echo_lc.starts_with("set ttarget") => {
            parse_single(&body, "TargetTemp", &mut fields)
        },
        other => {
            warn!("unknown cooler response echo: {other:?}");
        },
    }

    fields
}

fn parse_single(body: &[&str], label: &str, fields: &mut ParsedFields) {
    match body.first().map(|line| line.trim().parse::<f64>()) {
        Some(Ok(value)) => {
            fields.insert(label.to_string(), value);
        },
        other => warn!(field = label, "cooler value did not parse: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen1_table_is_subset_of_gen2() {
        let gen1 = all_commands(DeviceKind::CryocoolerGen1);
        let gen2 = all_commands(DeviceKind::CryocoolerGen2);
        for (name, wire) in gen1.commands {
            assert_eq!(gen2.get(name), Some(*wire));
        }
        assert!(gen1.get("mpower").is_none());
    }

    #[test]
    fn set_target_round_trips() {
        let set = remote_command(DeviceKind::CryocoolerGen2, "target", Some("55.0")).unwrap();
        assert_eq!(set["target"], "SET TTARGET=55.000\r");

        // A controller echoes the set back; it must parse to the same value.
        let fields = parse(b"SET TTARGET=55.000\r\n55.000\r\n");
        assert!((fields["TargetTemp"] - 55.0).abs() < 1e-9);
    }

    #[test]
    fn state_reply_parses_key_value_pairs() {
        let raw = b"STATE\r\nTSTATM = 2.00\r\nTSTAT = 0.00\r\nSSTOPM = 0.00\r\n";
        let fields = parse(raw);
        assert_eq!(fields.len(), 3);
        assert!((fields["TSTATM"] - 2.0).abs() < 1e-9);
        assert!((fields["SSTOPM"]).abs() < 1e-9);
    }

    #[test]
    fn power_triple_is_ordered() {
        let fields = parse(b"E\r\n240.00\r\n70.00\r\n128.37\r\n");
        assert!((fields["MaxPower"] - 240.0).abs() < 1e-9);
        assert!((fields["MinPower"] - 70.0).abs() < 1e-9);
        assert!((fields["CommandedPower"] - 128.37).abs() < 1e-9);
    }

    #[test]
    fn unknown_echo_is_soft() {
        assert!(parse(b"BOGUS\r\n1.0\r\n").is_empty());
    }

    #[test]
    fn stop_values_are_enumerated() {
        let set = remote_command(DeviceKind::CryocoolerGen2, "stop", Some("on")).unwrap();
        assert_eq!(set["stop"], "SET SSTOP=1\r");
        assert!(matches!(
            remote_command(DeviceKind::CryocoolerGen2, "stop", Some("maybe")),
            Err(CryoSrvError::InvalidArgument(_))
        ));
        assert!(matches!(
            remote_command(DeviceKind::CryocoolerGen2, "stopmode", Some("sideways")),
            Err(CryoSrvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn gen1_rejects_gen2_commands() {
        assert!(matches!(
            remote_command(DeviceKind::CryocoolerGen1, "mpower", None),
            Err(CryoSrvError::UnknownCommand { .. })
        ));
    }
}
