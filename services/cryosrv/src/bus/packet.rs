//! Bus wire payloads
//!
//! Everything on the bus is a small XML document with a fixed envelope:
//! a `CryoPacket` root wrapping an optional `cmd_id` and one named element
//! whose children are field/value pairs. Measurements and advertisements
//! go out through the writer here; inbound command packets come back in
//! through the reader.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::core::device::DeviceInstance;
use crate::error::{CryoSrvError, Result};
use crate::protocols::ParsedFields;

/// Envelope root tag shared by every packet this service reads or writes.
pub const ROOT_TAG: &str = "CryoPacket";

/// Element carrying an inbound request.
const COMMAND_TAG: &str = "Command";

/// A decoded inbound command request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub cmd_id: Option<String>,
    pub instrument: String,
    pub devicetype: String,
    pub tag: Option<String>,
    pub command: String,
    pub argument: Option<String>,
}

/// Serialize one measurement's fields for the bus.
pub fn build_measurement_packet(measurement: &str, fields: &ParsedFields) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    write_start(&mut writer, ROOT_TAG)?;
    write_start(&mut writer, measurement)?;
    for (name, value) in fields {
        write_text_element(&mut writer, name, &value.to_string())?;
    }
    write_end(&mut writer, measurement)?;
    write_end(&mut writer, ROOT_TAG)?;

    finish(writer)
}

/// Serialize a command request (used by test harnesses and remote peers;
/// the daemon itself only parses these).
pub fn build_command_packet(request: &CommandRequest) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    write_start(&mut writer, ROOT_TAG)?;
    if let Some(id) = &request.cmd_id {
        write_text_element(&mut writer, "cmd_id", id)?;
    }
    write_start(&mut writer, COMMAND_TAG)?;
    write_text_element(&mut writer, "request_instrument", &request.instrument)?;
    write_text_element(&mut writer, "request_devicetype", &request.devicetype)?;
    if let Some(tag) = &request.tag {
        write_text_element(&mut writer, "request_tag", tag)?;
    }
    write_text_element(&mut writer, "request_command", &request.command)?;
    if let Some(argument) = &request.argument {
        write_text_element(&mut writer, "request_argument", argument)?;
    }
    write_end(&mut writer, COMMAND_TAG)?;
    write_end(&mut writer, ROOT_TAG)?;

    finish(writer)
}

/// Serialize the discovery descriptor for every advertised device.
///
/// Reflects configured devices regardless of their enabled state; the
/// caller is responsible for filtering internal/compatibility-only entries.
pub fn build_advertisement_packet(devices: &[&DeviceInstance]) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    write_start(&mut writer, ROOT_TAG)?;
    write_start(&mut writer, "DeviceAdvertisement")?;
    for device in devices {
        write_start(&mut writer, "device")?;
        write_text_element(&mut writer, "instrument", &device.instrument)?;
        write_text_element(&mut writer, "devtype", device.devtype.as_str())?;
        write_text_element(&mut writer, "tag", &device.tag())?;
        write_text_element(&mut writer, "devhost", &device.devhost)?;
        write_text_element(&mut writer, "devport", &device.devport.to_string())?;
        write_text_element(&mut writer, "queryinterval", &device.queryinterval.to_string())?;
        write_text_element(&mut writer, "enabled", &device.enabled.to_string())?;
        write_end(&mut writer, "device")?;
    }
    write_end(&mut writer, "DeviceAdvertisement")?;
    write_end(&mut writer, ROOT_TAG)?;

    finish(writer)
}

/// Parse an inbound command packet.
///
/// The reader is deliberately tolerant about element order and nesting
/// depth — remote producers have historically been sloppy — but the
/// addressing triplet and the command keyword are required.
pub fn parse_command_packet(xml: &str) -> Result<CommandRequest> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut current = String::new();
    let mut cmd_id = None;
    let mut instrument = None;
    let mut devicetype = None;
    let mut tag = None;
    let mut command = None;
    let mut argument = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                current = String::from_utf8_lossy(start.name().as_ref()).into_owned();
            },
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|err| CryoSrvError::decode(format!("bad XML text: {err}")))?
                    .trim()
                    .to_string();
                if value.is_empty() {
                    continue;
                }
                match current.as_str() {
                    "cmd_id" => cmd_id = Some(value),
                    "request_instrument" => instrument = Some(value),
                    "request_devicetype" => devicetype = Some(value),
                    "request_tag" => tag = Some(value),
                    "request_command" => command = Some(value),
                    "request_argument" => argument = Some(value),
                    _ => {},
                }
            },
            Ok(Event::End(_)) => current.clear(),
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(err) => {
                return Err(CryoSrvError::decode(format!("bad command packet: {err}")));
            },
        }
    }

    Ok(CommandRequest {
        cmd_id,
        instrument: instrument
            .ok_or_else(|| CryoSrvError::decode("command packet missing request_instrument"))?,
        devicetype: devicetype
            .ok_or_else(|| CryoSrvError::decode("command packet missing request_devicetype"))?,
        tag,
        command: command
            .ok_or_else(|| CryoSrvError::decode("command packet missing request_command"))?,
        argument,
    })
}

fn write_start(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|err| CryoSrvError::Internal(format!("XML write: {err}")))
}

fn write_end(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|err| CryoSrvError::Internal(format!("XML write: {err}")))
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, value: &str) -> Result<()> {
    write_start(writer, name)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(|err| CryoSrvError::Internal(format!("XML write: {err}")))?;
    write_end(writer, name)
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> Result<String> {
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|err| CryoSrvError::Internal(format!("XML not UTF-8: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::DeviceKind;

    #[test]
    fn measurement_packet_has_envelope() {
        let mut fields = ParsedFields::new();
        fields.insert("ColdTipTemp".to_string(), 55.12);
        let xml = build_measurement_packet("nihts_cryocooler-gen2", &fields).unwrap();
        assert!(xml.starts_with("<CryoPacket>"));
        assert!(xml.contains("<ColdTipTemp>55.12</ColdTipTemp>"));
        assert!(xml.ends_with("</CryoPacket>"));
    }

    #[test]
    fn command_packet_round_trips() {
        let request = CommandRequest {
            cmd_id: Some("42aa".to_string()),
            instrument: "nihts".to_string(),
            devicetype: "cryocooler-gen2".to_string(),
            tag: Some("benchcooler".to_string()),
            command: "target".to_string(),
            argument: Some("55.0".to_string()),
        };
        let xml = build_command_packet(&request).unwrap();
        let parsed = parse_command_packet(&xml).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn missing_addressing_is_a_decode_error() {
        let xml = "<CryoPacket><Command><request_command>advertise</request_command></Command></CryoPacket>";
        assert!(matches!(
            parse_command_packet(xml),
            Err(CryoSrvError::Decode(_))
        ));
    }

    #[test]
    fn advertisement_lists_every_device() {
        let device = DeviceInstance {
            instrument: "lmi".to_string(),
            devtype: DeviceKind::VacuumGaugeMks972b,
            extratag: None,
            devhost: "gauge-bridge".to_string(),
            devport: 10005,
            queryinterval: 120,
            enabled: false,
            database: "primary".to_string(),
            broker: "primary".to_string(),
            brokertopic: "cryo.lmi.vacgauge".to_string(),
            tablename: "cryo".to_string(),
            internal: false,
        };
        let xml = build_advertisement_packet(&[&device]).unwrap();
        assert!(xml.contains("<devtype>vacuum-gauge-mks972b</devtype>"));
        assert!(xml.contains("<enabled>false</enabled>"));
        assert!(xml.contains("<devport>10005</devport>"));
    }
}
