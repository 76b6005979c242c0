//! Device registry
//!
//! One `DeviceInstance` per physical unit attached to an instrument. The
//! registry is owned by the main loop; the bus listener never touches it,
//! so there is no lock around it. All runtime mutation (enable flags,
//! host/port moves) funnels through the queue processor.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CryoSrvError;

/// Supported device families.
///
/// Each variant is one wire protocol; multiple physical units of the same
/// family are distinguished by instrument name and an optional extra tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// MKS 972B vacuum pressure transducer
    #[serde(rename = "vacuum-gauge-mks972b")]
    VacuumGaugeMks972b,
    /// Gen 1 cryocooler controller (no measured-power query)
    #[serde(rename = "cryocooler-gen1")]
    CryocoolerGen1,
    /// Gen 2 cryocooler controller
    #[serde(rename = "cryocooler-gen2")]
    CryocoolerGen2,
    /// Lake Shore 218 temperature monitor (8 inputs)
    #[serde(rename = "lakeshore218")]
    Lakeshore218,
    /// Lake Shore 325 temperature controller (2 inputs, 2 loops)
    #[serde(rename = "lakeshore325")]
    Lakeshore325,
    /// Newport iTHX temperature/humidity transmitter
    #[serde(rename = "newport-ithx")]
    NewportIthx,
    /// Newport iSD-TC dual thermocouple monitor
    #[serde(rename = "newport-isdtc")]
    NewportIsdtc,
    /// Pseudo-device: asks a detector host for its temperatures over the
    /// bus instead of a serial link; replies come back through the listener
    #[serde(rename = "arc-loisgettemp-proxy")]
    LoisGetTempProxy,
}

impl DeviceKind {
    /// All kinds that talk over the serial bridge (everything but the proxy).
    pub fn uses_transport(self) -> bool {
        !matches!(self, DeviceKind::LoisGetTempProxy)
    }

    /// Canonical configuration-file spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::VacuumGaugeMks972b => "vacuum-gauge-mks972b",
            DeviceKind::CryocoolerGen1 => "cryocooler-gen1",
            DeviceKind::CryocoolerGen2 => "cryocooler-gen2",
            DeviceKind::Lakeshore218 => "lakeshore218",
            DeviceKind::Lakeshore325 => "lakeshore325",
            DeviceKind::NewportIthx => "newport-ithx",
            DeviceKind::NewportIsdtc => "newport-isdtc",
            DeviceKind::LoisGetTempProxy => "arc-loisgettemp-proxy",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = CryoSrvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vacuum-gauge-mks972b" => Ok(DeviceKind::VacuumGaugeMks972b),
            "cryocooler-gen1" => Ok(DeviceKind::CryocoolerGen1),
            "cryocooler-gen2" => Ok(DeviceKind::CryocoolerGen2),
            "lakeshore218" => Ok(DeviceKind::Lakeshore218),
            "lakeshore325" => Ok(DeviceKind::Lakeshore325),
            "newport-ithx" => Ok(DeviceKind::NewportIthx),
            "newport-isdtc" => Ok(DeviceKind::NewportIsdtc),
            "arc-loisgettemp-proxy" => Ok(DeviceKind::LoisGetTempProxy),
            other => Err(CryoSrvError::UnknownDeviceKind(other.to_string())),
        }
    }
}

/// One physical device attached to one instrument.
///
/// Created from configuration at startup and never destroyed during a run;
/// disabling is the only deactivation path. `enabled`, `devhost` and
/// `devport` are the only runtime-mutable fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInstance {
    /// Instrument this device belongs to (e.g. "nihts")
    pub instrument: String,
    /// Device family
    pub devtype: DeviceKind,
    /// Disambiguates multiple units of the same family on one instrument
    #[serde(default)]
    pub extratag: Option<String>,
    /// Serial-bridge host
    pub devhost: String,
    /// Serial-bridge TCP port
    pub devport: u16,
    /// Seconds between scheduled polls (> 0)
    pub queryinterval: u64,
    /// Whether the device participates in scheduled polling
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Time-series connection key (resolved by the runtime, not owned here)
    pub database: String,
    /// Broker connection key (resolved by the runtime, not owned here)
    pub broker: String,
    /// Topic measurements for this device are published to
    pub brokertopic: String,
    /// Time-series table/measurement routing key
    pub tablename: String,
    /// Excluded from advertisements when set (compatibility-only devices)
    #[serde(default)]
    pub internal: bool,
}

fn default_enabled() -> bool {
    true
}

impl DeviceInstance {
    /// Unique scheduler tag: `instrument+devtype[+extratag]`.
    pub fn tag(&self) -> String {
        device_tag(&self.instrument, self.devtype.as_str(), self.extratag.as_deref())
    }

    /// Measurement name used on both the bus and the time-series store.
    pub fn measurement_name(&self) -> String {
        match &self.extratag {
            Some(extra) => format!("{}_{}_{}", self.instrument, self.devtype, extra),
            None => format!("{}_{}", self.instrument, self.devtype),
        }
    }
}

/// Build a registry/scheduler tag from its parts, normalized for lookup.
pub fn device_tag(instrument: &str, devtype: &str, extratag: Option<&str>) -> String {
    let mut tag = format!("{}+{}", instrument.to_ascii_lowercase(), devtype.to_ascii_lowercase());
    if let Some(extra) = extratag {
        if !extra.is_empty() {
            tag.push('+');
            tag.push_str(&extra.to_ascii_lowercase());
        }
    }
    tag
}

/// All configured devices, keyed by tag.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceInstance>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a device under its tag.
    pub fn insert(&mut self, device: DeviceInstance) -> String {
        let tag = device.tag();
        self.devices.insert(tag.clone(), device);
        tag
    }

    pub fn get(&self, tag: &str) -> Option<&DeviceInstance> {
        self.devices.get(tag)
    }

    pub fn get_mut(&mut self, tag: &str) -> Option<&mut DeviceInstance> {
        self.devices.get_mut(tag)
    }

    /// Resolve an inbound command's destination by its addressing parts.
    pub fn resolve(
        &self,
        instrument: &str,
        devtype: &str,
        extratag: Option<&str>,
    ) -> Option<&DeviceInstance> {
        self.devices
            .get(&device_tag(instrument, devtype, extratag))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeviceInstance)> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
