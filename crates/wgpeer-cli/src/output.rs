//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use wgpeer_core::{
    BackupSnapshot, BulkReport, DeleteOutcome, DeleteReport, ManifestErrors, PeerConfig, PlannedCreate,
    Registry, RestoreReport, StepStatus,
};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Peers found by a scan.
#[derive(Debug, Clone, Serialize)]
pub struct PeerList {
    /// Peers in name order.
    pub peers: Vec<PeerConfig>,
}

impl From<&Registry> for PeerList {
    fn from(registry: &Registry) -> Self {
        Self {
            peers: registry.peers().cloned().collect(),
        }
    }
}

impl TableDisplay for PeerList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.peers.is_empty() {
            writeln!(writer, "No peers configured")?;
            return Ok(());
        }

        writeln!(writer, "{:<32}  {:<15}  {:>5}  {:<4}", "NAME", "ADDRESS", "OCTET", "KEYS")?;
        writeln!(writer, "{}", "─".repeat(62))?;
        for peer in &self.peers {
            let keys = match (&peer.private_key_file, &peer.public_key_file) {
                (Some(_), Some(_)) => "both",
                (Some(_), None) => "priv",
                (None, Some(_)) => "pub",
                (None, None) => "-",
            };
            writeln!(
                writer,
                "{:<32}  {:<15}  {:>5}  {:<4}",
                peer.name, peer.address, peer.octet, keys
            )?;
        }

        writeln!(writer)?;
        writeln!(writer, "Total: {} peer(s)", self.peers.len())?;
        Ok(())
    }
}

/// Free addresses in the subnet.
#[derive(Debug, Clone, Serialize)]
pub struct AvailableOctets {
    /// Subnet prefix, e.g. `10.10.0`.
    pub subnet: String,
    /// Free octets, ascending.
    pub octets: Vec<u8>,
}

impl TableDisplay for AvailableOctets {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.octets.is_empty() {
            writeln!(writer, "No free addresses left in {}.0/24", self.subnet)?;
            return Ok(());
        }
        writeln!(writer, "Free addresses in {}.0/24: {}", self.subnet, self.octets.len())?;
        writeln!(writer, "  Octets:  {}", compress_ranges(&self.octets))?;
        if let Some(first) = self.octets.first() {
            writeln!(writer, "  Next:    {}.{first}", self.subnet)?;
        }
        Ok(())
    }
}

/// Renders ascending octets as `2-9, 11, 13-254`.
fn compress_ranges(octets: &[u8]) -> String {
    let mut parts = Vec::new();
    let mut iter = octets.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek().is_some_and(|&next| Some(next) == end.checked_add(1)) {
            end = iter.next().unwrap_or(end);
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    parts.join(", ")
}

impl TableDisplay for PeerConfig {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "✓ Created peer {} at {}", self.name, self.address)?;
        writeln!(writer, "  Config:  {}", self.config_file.display())?;
        Ok(())
    }
}

fn status_label(status: &StepStatus) -> String {
    match status {
        StepStatus::Done => "done".to_string(),
        StepStatus::Skipped(reason) => format!("skipped ({reason})"),
        StepStatus::Failed(reason) => format!("FAILED: {reason}"),
    }
}

impl TableDisplay for DeleteReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let headline = match self.outcome() {
            DeleteOutcome::FullSuccess => "✓ Deleted",
            DeleteOutcome::PartialSuccess => "Partially deleted",
            DeleteOutcome::Failure => "Failed to delete",
        };
        writeln!(writer, "{headline} peer {} ({})", self.name, self.address)?;
        for outcome in &self.steps {
            writeln!(writer, "  {:<18} {}", outcome.step.to_string(), status_label(&outcome.status))?;
        }
        Ok(())
    }
}

impl TableDisplay for ManifestErrors {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Manifest rejected, {} error(s):", self.len())?;
        for error in &self.0 {
            writeln!(writer, "  {error}")?;
        }
        Ok(())
    }
}

/// A validated creation manifest.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePlan {
    /// Subnet prefix.
    pub subnet: String,
    /// Items in execution order.
    pub items: Vec<PlannedCreate>,
}

impl TableDisplay for CreatePlan {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Will create {} peer(s):", self.items.len())?;
        for item in &self.items {
            let origin = if item.auto { "auto" } else { "requested" };
            writeln!(
                writer,
                "  {:<32}  {}.{:<3}  {origin}",
                item.name, self.subnet, item.octet
            )?;
        }
        Ok(())
    }
}

/// A validated deletion manifest.
#[derive(Debug, Clone, Serialize)]
pub struct DeletePlan {
    /// Peers in execution order.
    pub peers: Vec<PeerConfig>,
}

impl TableDisplay for DeletePlan {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Will delete {} peer(s):", self.peers.len())?;
        for peer in &self.peers {
            writeln!(writer, "  {:<32}  {}", peer.name, peer.address)?;
        }
        Ok(())
    }
}

impl TableDisplay for BulkReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(
            writer,
            "Bulk run finished: {} succeeded, {} failed, {} total",
            self.succeeded, self.failed, self.total
        )?;
        for item in self.failures() {
            writeln!(
                writer,
                "  ✗ {}: {}",
                item.name,
                item.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        if let Some(error) = &self.interface_error {
            writeln!(writer, "  Interface restart failed: {error}")?;
        }
        Ok(())
    }
}

/// What a backup file contains.
#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    /// File the backup was read from or written to.
    pub path: PathBuf,
    /// Schema version.
    pub version: u32,
    /// Creation time.
    pub created: String,
    /// Client names.
    pub clients: Vec<String>,
    /// Whether server keys are included.
    pub server_keys: bool,
    /// Auxiliary files included.
    pub variables: Vec<String>,
}

impl BackupSummary {
    /// Summarizes `snapshot` stored at `path`.
    #[must_use]
    pub fn new(path: PathBuf, snapshot: &BackupSnapshot) -> Self {
        Self {
            path,
            version: snapshot.version,
            created: snapshot.created.clone(),
            clients: snapshot.clients.keys().cloned().collect(),
            server_keys: snapshot.server_config.privatekey.is_some(),
            variables: snapshot.variables.keys().cloned().collect(),
        }
    }
}

impl TableDisplay for BackupSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Backup {}", self.path.display())?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Version:      {}", self.version)?;
        writeln!(writer, "Created:      {}", self.created)?;
        writeln!(writer, "Server keys:  {}", if self.server_keys { "yes" } else { "no" })?;
        writeln!(writer, "Clients:      {}", self.clients.len())?;
        for name in &self.clients {
            writeln!(writer, "  {name}")?;
        }
        if !self.variables.is_empty() {
            writeln!(writer, "Files:        {}", self.variables.join(", "))?;
        }
        Ok(())
    }
}

impl TableDisplay for RestoreReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Restored {}/{} client(s)", self.restored, self.total)?;
        if let Some(path) = &self.safety_copy {
            writeln!(writer, "  Previous state:  {}", path.display())?;
        }
        for failure in &self.failures {
            writeln!(writer, "  ✗ {}: {}", failure.item, failure.error)?;
        }
        if let Some(error) = &self.interface_error {
            writeln!(writer, "  Interface failed to start: {error}")?;
        }
        Ok(())
    }
}

/// Simple message output.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Message text.
    pub message: String,
    /// Whether this is a success message.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub success: bool,
}

impl Message {
    /// Create a success message.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
        }
    }

    /// Create an informational message.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
        }
    }
}

impl TableDisplay for Message {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.success {
            writeln!(writer, "✓ {}", self.message)?;
        } else {
            writeln!(writer, "{}", self.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use wgpeer_core::BulkItemResult;

    fn peer(name: &str, octet: u8) -> PeerConfig {
        PeerConfig {
            name: name.to_string(),
            address: format!("10.10.0.{octet}"),
            octet,
            config_file: Path::new("/etc/wireguard").join(format!("{name}_cl.conf")),
            private_key_file: None,
            public_key_file: None,
        }
    }

    #[test]
    fn output_format_default_is_table() {
        let fmt = OutputFormat::default();
        assert_eq!(fmt.format(), Format::Table);
        assert!(!fmt.is_json());
    }

    #[test]
    fn output_format_json() {
        let fmt = OutputFormat::new(Format::Json);
        assert_eq!(fmt.format(), Format::Json);
        assert!(fmt.is_json());
    }

    #[test]
    fn peer_list_table_output() {
        let list = PeerList {
            peers: vec![peer("alice", 10), peer("bob", 20)],
        };
        let output = OutputFormat::default().to_string(&list).expect("should format");

        assert!(output.contains("NAME"));
        assert!(output.contains("alice"));
        assert!(output.contains("10.10.0.20"));
        assert!(output.contains("Total: 2 peer(s)"));
    }

    #[test]
    fn peer_list_empty() {
        let list = PeerList { peers: vec![] };
        let output = OutputFormat::default().to_string(&list).expect("should format");
        assert!(output.contains("No peers configured"));
    }

    #[test]
    fn peer_list_json_output() {
        let list = PeerList {
            peers: vec![peer("alice", 10)],
        };
        let output = OutputFormat::new(Format::Json).to_string(&list).expect("should format");
        assert!(output.contains("\"name\": \"alice\""));
        assert!(output.contains("\"octet\": 10"));
    }

    #[test]
    fn available_compresses_ranges() {
        assert_eq!(compress_ranges(&[3, 4, 6, 7, 8, 10, 254]), "3-4, 6-8, 10, 254");
        assert_eq!(compress_ranges(&[]), "");

        let available = AvailableOctets {
            subnet: "10.10.0".into(),
            octets: vec![3, 4, 5],
        };
        let output = OutputFormat::default().to_string(&available).expect("should format");
        assert!(output.contains("Free addresses in 10.10.0.0/24: 3"));
        assert!(output.contains("Next:    10.10.0.3"));
    }

    #[test]
    fn available_when_full() {
        let available = AvailableOctets {
            subnet: "10.10.0".into(),
            octets: vec![],
        };
        let output = OutputFormat::default().to_string(&available).expect("should format");
        assert!(output.contains("No free addresses left"));
    }

    #[test]
    fn bulk_report_lists_failures() {
        let report = BulkReport {
            total: 2,
            succeeded: 1,
            failed: 1,
            items: vec![
                BulkItemResult {
                    name: "alice".into(),
                    address: Some("10.10.0.2".into()),
                    ok: true,
                    error: None,
                },
                BulkItemResult {
                    name: "bob".into(),
                    address: Some("10.10.0.3".into()),
                    ok: false,
                    error: Some("external tool failed".into()),
                },
            ],
            interface_error: None,
        };
        let output = OutputFormat::default().to_string(&report).expect("should format");
        assert!(output.contains("1 succeeded, 1 failed, 2 total"));
        assert!(output.contains("✗ bob: external tool failed"));
        assert!(!output.contains("alice"));
    }

    #[test]
    fn message_success_table() {
        let msg = Message::success("Backup written");
        let output = OutputFormat::default().to_string(&msg).expect("should format");
        assert!(output.contains("✓ Backup written"));
    }

    #[test]
    fn message_info_json_omits_success() {
        let msg = Message::info("nothing to do");
        let output = OutputFormat::new(Format::Json).to_string(&msg).expect("should format");
        assert!(output.contains("\"message\": \"nothing to do\""));
        assert!(!output.contains("success"));
    }
}
