//! Time-series storage
//!
//! Thin wrapper over the InfluxDB 2.x client plus the line-protocol
//! builder used by both the publisher and the legacy telemetry mirror.
//! Writes are fire-and-forget per poll: failures are logged by the caller
//! and never fatal to a polling job.

use std::collections::BTreeMap;

use influxdb2::Client;
use tracing::debug;

use crate::error::{CryoSrvError, Result};
use crate::protocols::ParsedFields;

/// InfluxDB 2.x client bound to one org/bucket.
pub struct InfluxClient {
    client: Client,
    org: String,
    bucket: String,
}

impl std::fmt::Debug for InfluxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxClient")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl InfluxClient {
    /// Create a new client. No connection is made until the first write.
    pub fn new(url: &str, org: &str, bucket: &str, token: &str) -> Self {
        debug!(url, org, bucket, "creating time-series client");
        Self {
            client: Client::new(url, org, token),
            org: org.to_string(),
            bucket: bucket.to_string(),
        }
    }

    /// Write one or more line-protocol rows into the default bucket.
    pub async fn write_line_protocol(&self, data: &str) -> Result<()> {
        self.write_to_table(&self.bucket, data).await
    }

    /// Write into a specific table (bucket); devices carry their own
    /// routing key and may point somewhere other than the default.
    pub async fn write_to_table(&self, table: &str, data: &str) -> Result<()> {
        let bucket = if table.is_empty() { &self.bucket } else { table };
        debug!(
            org = %self.org,
            bucket = %bucket,
            bytes = data.len(),
            "writing line protocol"
        );
        self.client
            .write_line_protocol(&self.org, bucket, data.to_string())
            .await
            .map_err(|err| CryoSrvError::Storage(format!("write failed: {err}")))
    }

    /// Health check against the store.
    pub async fn ping(&self) -> Result<()> {
        let health = self
            .client
            .health()
            .await
            .map_err(|err| CryoSrvError::Storage(format!("health check failed: {err}")))?;
        debug!("time-series health: {health:?}");
        Ok(())
    }
}

/// Build one line-protocol row: `measurement,tag=v field=v,...`.
///
/// The timestamp is omitted so the server assigns receipt time, matching
/// the at-least-once, best-effort delivery story. Returns `None` when
/// there are no fields — an empty row is not a valid write.
pub fn build_line(
    measurement: &str,
    tags: &BTreeMap<String, String>,
    fields: &ParsedFields,
) -> Option<String> {
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_name(measurement);
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_name(key));
        line.push('=');
        line.push_str(&escape_name(value));
    }
    line.push(' ');

    let rendered: Vec<String> = fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape_name(key), value))
        .collect();
    line.push_str(&rendered.join(","));

    Some(line)
}

/// Escape the characters line protocol treats specially in identifiers.
fn escape_name(name: &str) -> String {
    name.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_has_measurement_tags_and_fields() {
        let mut tags = BTreeMap::new();
        tags.insert("Device".to_string(), "cryocooler-gen2".to_string());
        let mut fields = ParsedFields::new();
        fields.insert("ColdTipTemp".to_string(), 55.12);
        fields.insert("MaxPower".to_string(), 240.0);

        let line = build_line("nihts_cryocooler-gen2", &tags, &fields).unwrap();
        assert_eq!(
            line,
            "nihts_cryocooler-gen2,Device=cryocooler-gen2 ColdTipTemp=55.12,MaxPower=240"
        );
    }

    #[test]
    fn empty_fields_build_nothing() {
        let tags = BTreeMap::new();
        assert!(build_line("x", &tags, &ParsedFields::new()).is_none());
    }

    #[test]
    fn special_characters_are_escaped() {
        let mut tags = BTreeMap::new();
        tags.insert("Device".to_string(), "bench cooler".to_string());
        let mut fields = ParsedFields::new();
        fields.insert("TempK".to_string(), 55.0);

        let line = build_line("nihts meas", &tags, &fields).unwrap();
        assert!(line.starts_with("nihts\\ meas,Device=bench\\ cooler "));
    }
}
