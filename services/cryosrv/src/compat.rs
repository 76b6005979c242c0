//! Legacy fixed-width export sink
//!
//! A downstream legacy display still reads its temperatures from a single
//! brace-delimited "upfile" on disk. Each configured instrument device
//! owns one section; sections refresh as their polls complete and the
//! whole file is rewritten atomically afterwards. Numeric formatting is
//! section-specific and has to stay bit-exact for the legacy reader:
//!
//! ```text
//! { { { NIHTS1_cooler } {20191115 21:03:34} {
//!     { TempK 054.99 } { Setpt 055.00 } { Maxpow 240.00 } { Minpow 070.00 }
//!     { Meanpow 128.37 } } } ... }
//! ```

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::device::{DeviceInstance, DeviceKind};
use crate::protocols::ParsedFields;

/// How one upfile value is rendered.
#[derive(Debug, Clone, Copy)]
enum NumberFormat {
    /// Zero-padded to six columns: `054.99`
    Padded,
    /// Signed and zero-padded to six columns: `+00.54`
    SignedPadded,
    /// Explicit sign, five significant digits: `+83.399`, `+333.00`
    SignedSig5,
    /// Two-digit mantissa exponent form: `1.00E-8`
    Exponent,
}

fn render_value(value: f64, format: NumberFormat) -> String {
    match format {
        NumberFormat::Padded => format!("{value:06.2}"),
        NumberFormat::SignedPadded => format!("{value:+06.2}"),
        NumberFormat::SignedSig5 => {
            let magnitude = value.abs();
            let int_digits = if magnitude < 1.0 {
                1
            } else {
                magnitude.log10().floor() as i32 + 1
            };
            let decimals = (5 - int_digits).clamp(0, 5) as usize;
            format!("{value:+.decimals$}")
        },
        NumberFormat::Exponent => format!("{value:.2E}"),
    }
}

/// Label, source field, and format for one upfile entry.
type EntrySpec = (&'static str, &'static str, NumberFormat);

const COOLER_ENTRIES: &[EntrySpec] = &[
    ("TempK", "ColdTipTemp", NumberFormat::Padded),
    ("Setpt", "TargetTemp", NumberFormat::Padded),
    ("Maxpow", "MaxPower", NumberFormat::Padded),
    ("Minpow", "MinPower", NumberFormat::Padded),
    ("Meanpow", "CommandedPower", NumberFormat::Padded),
];

const LS218_ENTRIES: &[EntrySpec] = &[
    ("SINK1", "Sensor1", NumberFormat::SignedSig5),
    ("SINK2", "Sensor2", NumberFormat::SignedSig5),
    ("DEWAR", "Sensor3", NumberFormat::SignedSig5),
    ("FLSHLD", "Sensor4", NumberFormat::SignedSig5),
    ("DETBK", "Sensor5", NumberFormat::SignedSig5),
    ("BENCH", "Sensor6", NumberFormat::SignedSig5),
    ("PRISM", "Sensor7", NumberFormat::SignedSig5),
    ("INSTRAP", "Sensor8", NumberFormat::SignedSig5),
];

const LS325_ENTRIES: &[EntrySpec] = &[
    ("GETTER", "SensorTempA", NumberFormat::SignedSig5),
    ("GSETPT", "Setpoint1", NumberFormat::SignedSig5),
    ("GHEAT", "Heater1", NumberFormat::SignedPadded),
    ("DETECTOR", "SensorTempB", NumberFormat::SignedSig5),
    ("DSETPT", "Setpoint2", NumberFormat::SignedSig5),
    ("DHEAT", "Heater2", NumberFormat::SignedPadded),
];

const VACGAUGE_ENTRIES: &[EntrySpec] = &[("Torr", "CMB4Digit", NumberFormat::Exponent)];

#[derive(Debug)]
struct Section {
    /// Registry tag of the owning device
    tag: String,
    name: String,
    updated: Option<DateTime<Utc>>,
    spec: &'static [EntrySpec],
    values: Vec<Option<String>>,
}

impl Section {
    fn render(&self) -> Option<String> {
        let updated = self.updated?;
        let entries: Vec<String> = self
            .spec
            .iter()
            .zip(&self.values)
            .filter_map(|((label, _, _), value)| {
                value.as_ref().map(|v| format!("{{ {label} {v} }}"))
            })
            .collect();
        if entries.is_empty() {
            return None;
        }
        Some(format!(
            "{{ {{ {} }} {{{}}} {{ {} }} }}",
            self.name,
            updated.format("%Y%m%d %H:%M:%S"),
            entries.join(" ")
        ))
    }
}

/// The upfile itself: ordered sections plus the target path.
#[derive(Debug)]
pub struct UpfileSink {
    path: PathBuf,
    instrument: String,
    sections: Vec<Section>,
}

impl UpfileSink {
    pub fn new(path: PathBuf, instrument: impl Into<String>) -> Self {
        Self {
            path,
            instrument: instrument.into().to_ascii_lowercase(),
            sections: Vec::new(),
        }
    }

    /// Whether this sink wants updates from the given device.
    pub fn applies_to(&self, device: &DeviceInstance) -> bool {
        device.instrument.eq_ignore_ascii_case(&self.instrument)
            && section_spec(device.devtype).is_some()
    }

    /// Refresh the device's section from one poll's parsed fields.
    pub fn update(&mut self, device: &DeviceInstance, fields: &ParsedFields, stamp: DateTime<Utc>) {
        let Some(spec) = section_spec(device.devtype) else {
            return;
        };
        let tag = device.tag();

        let position = match self.sections.iter().position(|s| s.tag == tag) {
            Some(position) => position,
            None => {
                let name = self.section_name(device);
                self.sections.push(Section {
                    tag: tag.clone(),
                    name,
                    updated: None,
                    spec,
                    values: vec![None; spec.len()],
                });
                self.sections.len() - 1
            },
        };
        let section = &mut self.sections[position];

        let mut touched = false;
        for (slot, (_, source, format)) in section.spec.iter().enumerate() {
            if let Some(value) = fields.get(*source) {
                section.values[slot] = Some(render_value(*value, *format));
                touched = true;
            }
        }
        if touched {
            section.updated = Some(stamp);
            debug!(tag = %tag, "refreshed upfile section");
        }
    }

    /// Render the whole file as its single-line legacy form.
    pub fn render(&self) -> String {
        let sections: Vec<String> = self.sections.iter().filter_map(Section::render).collect();
        format!("{{ {} }}", sections.join(" "))
    }

    /// Atomically rewrite the file (temp + rename), so the legacy reader
    /// never sees a torn write.
    pub fn write(&self) {
        let tmp = self.path.with_extension("tmp");
        let result = std::fs::File::create(&tmp)
            .and_then(|mut file| writeln!(file, "{}", self.render()))
            .and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(err) = result {
            warn!(path = %self.path.display(), error = %err, "upfile write failed");
        }
    }

    fn section_name(&self, device: &DeviceInstance) -> String {
        let instrument = device.instrument.to_ascii_uppercase();
        match device.devtype {
            DeviceKind::CryocoolerGen1 | DeviceKind::CryocoolerGen2 => {
                let ordinal = 1 + self
                    .sections
                    .iter()
                    .filter(|s| s.name.ends_with("_cooler"))
                    .count();
                format!("{instrument}{ordinal}_cooler")
            },
            DeviceKind::Lakeshore218 => format!("{instrument}_Lakeshore218"),
            DeviceKind::Lakeshore325 => format!("{instrument}_Lakeshore325"),
            DeviceKind::VacuumGaugeMks972b => format!("{instrument}_vacgauge"),
            _ => instrument,
        }
    }
}

fn section_spec(kind: DeviceKind) -> Option<&'static [EntrySpec]> {
    match kind {
        DeviceKind::CryocoolerGen1 | DeviceKind::CryocoolerGen2 => Some(COOLER_ENTRIES),
        DeviceKind::Lakeshore218 => Some(LS218_ENTRIES),
        DeviceKind::Lakeshore325 => Some(LS325_ENTRIES),
        DeviceKind::VacuumGaugeMks972b => Some(VACGAUGE_ENTRIES),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn device(kind: DeviceKind, extratag: Option<&str>) -> DeviceInstance {
        DeviceInstance {
            instrument: "nihts".to_string(),
            devtype: kind,
            extratag: extratag.map(str::to_string),
            devhost: "bridge".to_string(),
            devport: 10001,
            queryinterval: 60,
            enabled: true,
            database: "primary".to_string(),
            broker: "primary".to_string(),
            brokertopic: "cryo.nihts".to_string(),
            tablename: "cryo".to_string(),
            internal: false,
        }
    }

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 11, 15, 21, 3, 34).unwrap()
    }

    #[test]
    fn padded_format_matches_legacy_samples() {
        assert_eq!(render_value(54.99, NumberFormat::Padded), "054.99");
        assert_eq!(render_value(240.0, NumberFormat::Padded), "240.00");
        assert_eq!(render_value(70.0, NumberFormat::Padded), "070.00");
    }

    #[test]
    fn signed_formats_match_legacy_samples() {
        assert_eq!(render_value(293.36, NumberFormat::SignedSig5), "+293.36");
        assert_eq!(render_value(83.399, NumberFormat::SignedSig5), "+83.399");
        assert_eq!(render_value(333.0, NumberFormat::SignedSig5), "+333.00");
        assert_eq!(render_value(56.716, NumberFormat::SignedSig5), "+56.716");
        assert_eq!(render_value(0.54, NumberFormat::SignedPadded), "+00.54");
        assert_eq!(render_value(0.0, NumberFormat::SignedPadded), "+00.00");
    }

    #[test]
    fn exponent_format_matches_legacy_sample() {
        assert_eq!(render_value(1.0e-8, NumberFormat::Exponent), "1.00E-8");
    }

    #[test]
    fn cooler_section_renders_bit_exact() {
        let mut sink = UpfileSink::new(PathBuf::from("/tmp/upfile"), "nihts");
        let mut fields = ParsedFields::new();
        fields.insert("ColdTipTemp".to_string(), 54.99);
        fields.insert("TargetTemp".to_string(), 55.0);
        fields.insert("MaxPower".to_string(), 240.0);
        fields.insert("MinPower".to_string(), 70.0);
        fields.insert("CommandedPower".to_string(), 128.37);

        sink.update(&device(DeviceKind::CryocoolerGen2, Some("bench")), &fields, stamp());

        assert_eq!(
            sink.render(),
            "{ { { NIHTS1_cooler } {20191115 21:03:34} { { TempK 054.99 } \
             { Setpt 055.00 } { Maxpow 240.00 } { Minpow 070.00 } { Meanpow 128.37 } } } }"
        );
    }

    #[test]
    fn two_coolers_get_distinct_sections() {
        let mut sink = UpfileSink::new(PathBuf::from("/tmp/upfile"), "nihts");
        let mut fields = ParsedFields::new();
        fields.insert("ColdTipTemp".to_string(), 54.99);

        sink.update(&device(DeviceKind::CryocoolerGen2, Some("bench")), &fields, stamp());
        sink.update(&device(DeviceKind::CryocoolerGen2, Some("dewar")), &fields, stamp());

        let rendered = sink.render();
        assert!(rendered.contains("NIHTS1_cooler"));
        assert!(rendered.contains("NIHTS2_cooler"));
    }

    #[test]
    fn partial_update_keeps_earlier_values() {
        let mut sink = UpfileSink::new(PathBuf::from("/tmp/upfile"), "nihts");
        let cooler = device(DeviceKind::CryocoolerGen2, None);

        let mut first = ParsedFields::new();
        first.insert("ColdTipTemp".to_string(), 54.99);
        first.insert("MaxPower".to_string(), 240.0);
        sink.update(&cooler, &first, stamp());

        let mut second = ParsedFields::new();
        second.insert("ColdTipTemp".to_string(), 55.10);
        sink.update(&cooler, &second, stamp());

        let rendered = sink.render();
        assert!(rendered.contains("{ TempK 055.10 }"));
        assert!(rendered.contains("{ Maxpow 240.00 }"));
    }

    #[test]
    fn sink_ignores_foreign_instruments_and_kinds() {
        let sink = UpfileSink::new(PathBuf::from("/tmp/upfile"), "nihts");
        let mut other = device(DeviceKind::CryocoolerGen2, None);
        other.instrument = "lmi".to_string();
        assert!(!sink.applies_to(&other));
        assert!(!sink.applies_to(&device(DeviceKind::NewportIthx, None)));
        assert!(sink.applies_to(&device(DeviceKind::Lakeshore218, None)));
    }

    #[test]
    fn write_is_atomic_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cooler.current");
        let mut sink = UpfileSink::new(path.clone(), "nihts");

        let mut fields = ParsedFields::new();
        fields.insert("CMB4Digit".to_string(), 1.0e-8);
        sink.update(&device(DeviceKind::VacuumGaugeMks972b, None), &fields, stamp());
        sink.write();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("{ { NIHTS_vacgauge } {20191115 21:03:34} { { Torr 1.00E-8 } } }"));
        assert!(!path.with_extension("tmp").exists());
    }
}
