//! Backup, restore and backup validation.

use std::io::Write;
use std::path::{Path, PathBuf};

use wgpeer_core::backup::DEFAULT_EXPORT_FILE;
use wgpeer_core::{BackupSnapshot, InterfaceControl, PeerManager, Provisioner, RestoreOptions};

use crate::error::CliError;
use crate::output::{BackupSummary, Message, OutputFormat};

/// Backup command executor.
pub struct BackupCommand<'a, P, C> {
    manager: &'a PeerManager<P, C>,
}

impl<'a, P: Provisioner, C: InterfaceControl> BackupCommand<'a, P, C> {
    /// Create a new backup command.
    #[must_use]
    pub fn new(manager: &'a PeerManager<P, C>) -> Self {
        Self { manager }
    }

    /// Export everything to `output`, or the default export file.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or the export written.
    pub async fn backup<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        output: Option<&Path>,
    ) -> Result<(), CliError> {
        let path = output.map_or_else(|| PathBuf::from(DEFAULT_EXPORT_FILE), Path::to_path_buf);
        let snapshot = self.manager.backup().await?;
        snapshot.write_to(&path)?;
        format.write(writer, &BackupSummary::new(path, &snapshot))
    }

    /// Check that `file` is a restorable backup.
    ///
    /// # Errors
    ///
    /// Returns an error naming the problem if it is not.
    pub fn check<W: Write>(&self, writer: &mut W, format: &OutputFormat, file: &Path) -> Result<(), CliError> {
        let snapshot = BackupSnapshot::read_from(file)?;
        format.write(writer, &BackupSummary::new(file.to_path_buf(), &snapshot))
    }

    /// Restore `file`. Without `execute` only describes what would be restored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup is invalid, or if the restore did not
    /// fully succeed.
    pub async fn restore<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        file: &Path,
        endpoint: Option<&str>,
        execute: bool,
    ) -> Result<(), CliError> {
        let snapshot = BackupSnapshot::read_from(file)?;

        if !execute {
            format.write(writer, &BackupSummary::new(file.to_path_buf(), &snapshot))?;
            if !format.is_json() {
                let msg = Message::info(format!(
                    "\nThis replaces everything in {}. Re-run with --yes to restore.",
                    self.manager.config().config_dir.display()
                ));
                format.write(writer, &msg)?;
            }
            return Ok(());
        }

        let options = RestoreOptions {
            endpoint_host: endpoint.map(str::to_string),
        };
        let report = self.manager.restore(&snapshot, &options).await?;
        format.write(writer, &report)?;

        if report.is_complete() {
            Ok(())
        } else {
            Err(CliError::Incomplete(format!(
                "restored {}/{} client(s), {} failure(s){}",
                report.restored,
                report.total,
                report.failures.len(),
                if report.interface_error.is_some() {
                    ", interface did not start"
                } else {
                    ""
                }
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;
    use crate::commands::testing::fixture;

    fn table() -> OutputFormat {
        OutputFormat::new(Format::Table)
    }

    #[tokio::test]
    async fn backup_check_and_restore() {
        let f = fixture();
        f.manager.add_peer("alice", None).await.expect("alice");
        f.manager.add_peer("bob", Some(30)).await.expect("bob");
        let file = f.dir.path().join("export.json");
        let cmd = BackupCommand::new(&f.manager);
        let mut out = Vec::new();

        cmd.backup(&mut out, &table(), Some(&file)).await.expect("backup");
        cmd.check(&mut out, &table(), &file).expect("valid");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Clients:      2"));

        f.manager.remove_peer("bob").await.expect("removed");

        let mut out = Vec::new();
        cmd.restore(&mut out, &table(), &file, None, false).await.expect("dry run");
        assert!(f.manager.list().expect("scan").get("bob").is_none(), "dry run changes nothing");
        assert!(String::from_utf8(out).expect("utf8").contains("--yes"));

        let mut out = Vec::new();
        cmd.restore(&mut out, &table(), &file, Some("vpn.example.net"), true)
            .await
            .expect("restored");
        assert!(String::from_utf8(out).expect("utf8").contains("Restored 2/2 client(s)"));
        assert_eq!(f.manager.list().expect("scan").get("bob").expect("bob").octet, 30);

        let bob = std::fs::read_to_string(f.manager.config().client_config("bob")).expect("bob");
        assert!(bob.contains("Endpoint = vpn.example.net:51830"));
    }

    #[test]
    fn check_rejects_incomplete_backup() {
        let f = fixture();
        let file = f.dir.path().join("broken.json");
        std::fs::write(&file, r#"{"version": 1, "clients": {}}"#).expect("write");

        let mut out = Vec::new();
        let err = BackupCommand::new(&f.manager)
            .check(&mut out, &table(), &file)
            .expect_err("invalid");
        assert!(err.to_string().contains("missing required field(s): created, server_config"));
    }
}
