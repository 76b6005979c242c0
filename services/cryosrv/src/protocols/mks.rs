//! MKS 972B vacuum pressure transducer
//!
//! This is the command set for the gauge itself; the usual controller
//! sitting in front of it speaks a different protocol and is not supported.
//! Serial setup on the bridge: 9600 baud, 8 data, 1 stop, no parity.
//!
//! Replies look like `@<3-digit addr><ACK|NAK><value>;FF`, with `\r`
//! separating the lines of a multi-line answer inside the payload.

use tracing::warn;

use super::{decode_text, CommandSet, CommandTable, ParsedFields};
use crate::error::{CryoSrvError, Result};

const TERMINATOR: &str = ";FF";

const COMMANDS: &[(&str, &str)] = &[
    ("micropirani", "@254PR1?"),
    ("coldcathode", "@254PR2?"),
    ("comboprec3", "@254PR3?"),
    ("comboprec4", "@254PR4?"),
];

pub fn all_commands() -> CommandTable {
    CommandTable {
        commands: COMMANDS,
        terminator: TERMINATOR,
    }
}

/// Default poll set: both bare sensors plus the 4-digit combined reading.
pub fn default_queries() -> CommandSet {
    let table = all_commands();
    let mut set = CommandSet::new();
    for (field, key) in [
        ("MicroPirani", "micropirani"),
        ("ColdCathode", "coldcathode"),
        ("CMB4Digit", "comboprec4"),
    ] {
        if let Some(wire) = table.wire(key) {
            set.insert(field.to_string(), wire);
        }
    }
    set
}

/// Remote command resolution. The gauge commands take no values, so this
/// is just a table lookup plus the `getvals` alias for the default set.
pub fn remote_command(command: &str) -> Result<CommandSet> {
    if command.eq_ignore_ascii_case("getvals") {
        return Ok(default_queries());
    }

    let table = all_commands();
    match table.wire(command) {
        Some(wire) => {
            let mut set = CommandSet::new();
            set.insert(command.to_string(), wire);
            Ok(set)
        },
        None => Err(CryoSrvError::unknown_command("vacuum-gauge-mks972b", command)),
    }
}

/// Decoded transducer reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeReply {
    /// Three-digit device address, usually "254"
    pub address: String,
    /// "ACK" or "NAK"
    pub status: String,
    /// Payload lines (multi-line answers split on `\r`)
    pub values: Vec<String>,
}

/// Split a raw reply into address, status and payload values.
pub fn split_reply(raw: &[u8]) -> Option<GaugeReply> {
    let text = decode_text(raw)?;
    // Byte-offset framing below requires a pure-ASCII reply.
    if text.len() < 8 || !text.starts_with('@') || !text.is_ascii() {
        warn!("gauge reply too short or malformed: {text:?}");
        return None;
    }

    let address = text[1..4].to_string();
    let status = text[4..7].to_string();

    let payload = match text.split(TERMINATOR).next() {
        Some(head) if head.len() > 7 => &head[7..],
        _ => {
            warn!("gauge reply carries no payload: {text:?}");
            return None;
        },
    };
    let values = payload.split('\r').map(str::to_string).collect();

    Some(GaugeReply {
        address,
        status,
        values,
    })
}

/// Parse one poll reply into fields, applying the ACK gate: a NAK reply
/// still decodes but contributes nothing, so a stuck sensor cannot smear
/// error codes into the time series.
pub fn parse(symbolic: &str, raw: &[u8]) -> ParsedFields {
    let mut fields = ParsedFields::new();
    let Some(reply) = split_reply(raw) else {
        return fields;
    };

    if reply.status != "ACK" {
        warn!(
            command = symbolic,
            status = %reply.status,
            "gauge reply status was not ACK; dropping value {:?}",
            reply.values
        );
        return fields;
    }

    match reply.values.first().map(|v| v.trim().parse::<f64>()) {
        Some(Ok(value)) => {
            fields.insert(symbolic.to_string(), value);
        },
        other => {
            warn!(command = symbolic, "gauge value did not parse: {other:?}");
        },
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_ack_reply() {
        let reply = split_reply(b"@254ACK1.23E-5\r;FF").unwrap();
        assert_eq!(reply.address, "254");
        assert_eq!(reply.status, "ACK");
        assert_eq!(reply.values, vec!["1.23E-5".to_string()]);
    }

    #[test]
    fn ack_reply_yields_field() {
        let fields = parse("MicroPirani", b"@254ACK1.23E-5\r;FF");
        assert_eq!(fields.len(), 1);
        assert!((fields["MicroPirani"] - 1.23e-5).abs() < 1e-12);
    }

    #[test]
    fn nak_reply_parses_but_emits_nothing() {
        // The value is still decodable...
        let reply = split_reply(b"@254NAK180\r;FF").unwrap();
        assert_eq!(reply.status, "NAK");
        assert_eq!(reply.values, vec!["180".to_string()]);
        // ...but the field layer drops it.
        assert!(parse("ColdCathode", b"@254NAK180\r;FF").is_empty());
    }

    #[test]
    fn garbage_yields_empty() {
        assert!(parse("MicroPirani", b"\xff\xfe\x00").is_empty());
        assert!(parse("MicroPirani", b"").is_empty());
        assert!(parse("MicroPirani", b"@25").is_empty());
    }

    #[test]
    fn getvals_expands_to_default_set() {
        let set = remote_command("getvals").unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set["MicroPirani"], "@254PR1?;FF");
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(remote_command("bakeout").is_err());
    }
}
