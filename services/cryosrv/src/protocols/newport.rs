//! Newport iTHX and iSD-TC transmitters
//!
//! These connect over a plain socket with CR line termination. Replies are
//! fixed-width numerics that may carry a one-letter unit prefix or suffix
//! (`T`, `H`, `F`, `C`) depending on a hardware jumper, so unit presence is
//! detected per reply rather than assumed from configuration. A leading
//! minus sign is part of the number, not a unit letter.

use tracing::warn;

use super::{decode_text, CommandSet, CommandTable, ParsedFields};
use crate::core::device::DeviceKind;
use crate::error::{CryoSrvError, Result};

const TERMINATOR: &str = "\r";

const ITHX_COMMANDS: &[(&str, &str)] = &[
    ("readtemp", "*SRTC"),
    ("readhumi", "*SRH"),
    ("readdewp", "*SRD"),
];

const ISDTC_COMMANDS: &[(&str, &str)] = &[
    ("readtemp1", "*SRTC"),
    ("readtemp2", "*SRHC"),
    ("readdiff", "*SRDC"),
];

pub fn all_commands(kind: DeviceKind) -> CommandTable {
    let commands = match kind {
        DeviceKind::NewportIthx => ITHX_COMMANDS,
        _ => ISDTC_COMMANDS,
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
        DeviceKind::NewportIthx => &[
            ("Temperature", "readtemp"),
            ("Humidity", "readhumi"),
            ("Dewpoint", "readdewp"),
        ],
        _ => &[
            ("Temperature1", "readtemp1"),
            ("Temperature2", "readtemp2"),
            ("Difference", "readdiff"),
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

/// Remote command resolution; none of these take values.
pub fn remote_command(kind: DeviceKind, command: &str) -> Result<CommandSet> {
    if command.eq_ignore_ascii_case("readall") {
        return Ok(default_queries(kind));
    }

    let table = all_commands(kind);
    match table.wire(command) {
        Some(wire) => {
            let mut set = CommandSet::new();
            set.insert(command.to_string(), wire);
            Ok(set)
        },
        None => Err(CryoSrvError::unknown_command(kind.as_str(), command)),
    }
}

/// Shave a unit letter off either end when present, leaving the number.
fn strip_unit_letters(reply: &str) -> &str {
    let mut s = reply;
    if let Some(first) = s.chars().next() {
        if !first.is_ascii_digit() && first != '-' {
            s = &s[first.len_utf8()..];
        }
    }
    if let Some(last) = s.chars().last() {
        if !last.is_ascii_digit() {
            s = &s[..s.len() - last.len_utf8()];
        }
    }
    s
}

/// Parse one reply into a single field named after the symbolic command.
pub fn parse(symbolic: &str, raw: &[u8]) -> ParsedFields {
    let mut fields = ParsedFields::new();
    let Some(text) = decode_text(raw) else {
        return fields;
    };

    let stripped = strip_unit_letters(text.trim());
    match stripped.parse::<f64>() {
        Ok(value) => {
            fields.insert(symbolic.to_string(), value);
        },
        Err(err) => warn!(
            error = %err,
            command = symbolic,
            "transmitter reply did not parse: {text:?}"
        ),
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_prefix_is_stripped() {
        let fields = parse("Temperature", b"T023.5\r");
        assert!((fields["Temperature"] - 23.5).abs() < 1e-9);
    }

    #[test]
    fn unit_suffix_is_stripped() {
        let fields = parse("Humidity", b"047.2H\r");
        assert!((fields["Humidity"] - 47.2).abs() < 1e-9);
    }

    #[test]
    fn bare_number_passes_through() {
        let fields = parse("Dewpoint", b"012.8");
        assert!((fields["Dewpoint"] - 12.8).abs() < 1e-9);
    }

    #[test]
    fn leading_minus_is_not_a_unit_letter() {
        // Negative-only readings must survive the prefix heuristic.
        let fields = parse("Temperature", b"-010.5\r");
        assert!((fields["Temperature"] + 10.5).abs() < 1e-9);

        let fields = parse("Temperature", b"C-010.5\r");
        assert!((fields["Temperature"] + 10.5).abs() < 1e-9);
    }

    #[test]
    fn garbage_yields_empty() {
        assert!(parse("Temperature", b"??").is_empty());
        assert!(parse("Temperature", b"").is_empty());
    }

    #[test]
    fn families_have_distinct_tables() {
        assert!(all_commands(DeviceKind::NewportIthx).get("readhumi").is_some());
        assert!(all_commands(DeviceKind::NewportIsdtc).get("readhumi").is_none());
        assert!(remote_command(DeviceKind::NewportIsdtc, "readdiff").is_ok());
    }
}
