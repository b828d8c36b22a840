//! Manifest-driven bulk creation and deletion.
//!
//! Without `--yes` the manifest is only validated and the plan printed.

use std::io::Write;

use wgpeer_core::{BulkItemResult, BulkReport, InterfaceControl, ManifestErrors, PeerManager, Provisioner};

use crate::error::CliError;
use crate::output::{CreatePlan, DeletePlan, OutputFormat};

const CONFIRM_HINT: &str = "Re-run with --yes to execute.";

/// Bulk command executor.
pub struct BulkCommand<'a, P, C> {
    manager: &'a PeerManager<P, C>,
}

impl<'a, P: Provisioner, C: InterfaceControl> BulkCommand<'a, P, C> {
    /// Create a new bulk command.
    #[must_use]
    pub fn new(manager: &'a PeerManager<P, C>) -> Self {
        Self { manager }
    }

    /// Validate a creation manifest and, with `execute`, run it.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is rejected or any item failed.
    pub async fn create<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        manifest: &str,
        execute: bool,
    ) -> Result<(), CliError> {
        let items = match self.manager.plan_bulk_create(manifest)? {
            Ok(items) => items,
            Err(errors) => return reject(writer, format, &errors),
        };

        if !execute {
            let plan = CreatePlan {
                subnet: self.manager.config().subnet_prefix.clone(),
                items,
            };
            format.write(writer, &plan)?;
            return hint(writer, format);
        }

        let progress = !format.is_json();
        let report = self
            .manager
            .bulk_create(manifest, |done, total, item| {
                if progress {
                    write_progress(&mut *writer, done, total, item);
                }
            })
            .await?;
        finish(writer, format, &report)
    }

    /// Validate a deletion manifest and, with `execute`, run it.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is rejected or any item failed.
    pub async fn delete<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        manifest: &str,
        execute: bool,
    ) -> Result<(), CliError> {
        let peers = match self.manager.plan_bulk_delete(manifest)? {
            Ok(peers) => peers,
            Err(errors) => return reject(writer, format, &errors),
        };

        if !execute {
            format.write(writer, &DeletePlan { peers })?;
            return hint(writer, format);
        }

        let progress = !format.is_json();
        let report = self
            .manager
            .bulk_delete(manifest, |done, total, item| {
                if progress {
                    write_progress(&mut *writer, done, total, item);
                }
            })
            .await?;
        finish(writer, format, &report)
    }
}

fn reject<W: Write>(writer: &mut W, format: &OutputFormat, errors: &ManifestErrors) -> Result<(), CliError> {
    format.write(writer, errors)?;
    Err(CliError::Manifest { count: errors.len() })
}

fn hint<W: Write>(writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
    if !format.is_json() {
        writeln!(writer)?;
        writeln!(writer, "{CONFIRM_HINT}")?;
    }
    Ok(())
}

fn write_progress<W: Write>(writer: &mut W, done: usize, total: usize, item: &BulkItemResult) {
    let mark = if item.ok { "✓" } else { "✗" };
    // Progress is best-effort; the final report carries the outcome.
    let _ = writeln!(writer, "[{done}/{total}] {mark} {}", item.name);
}

fn finish<W: Write>(writer: &mut W, format: &OutputFormat, report: &BulkReport) -> Result<(), CliError> {
    format.write(writer, report)?;
    report.check()?;
    Ok(())
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
    async fn dry_run_prints_plan_only() {
        let f = fixture();
        let mut out = Vec::new();

        BulkCommand::new(&f.manager)
            .create(&mut out, &table(), "alice\nbob:40\n", false)
            .await
            .expect("plan");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Will create 2 peer(s)"));
        assert!(text.contains("10.10.0.40"));
        assert!(text.contains(CONFIRM_HINT));
        assert!(f.provisioner.calls().is_empty());
    }

    #[tokio::test]
    async fn rejected_manifest_lists_every_error() {
        let f = fixture();
        let mut out = Vec::new();

        let err = BulkCommand::new(&f.manager)
            .create(&mut out, &table(), "bad name\nx:7\ny:7\n", true)
            .await
            .expect_err("rejected");

        assert!(matches!(err, CliError::Manifest { count: 2 }));
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("line 1: name 'bad name' contains illegal character ' '"));
        assert!(text.contains("line 3: duplicate octet 7 (first on line 2)"));
        assert!(f.provisioner.calls().is_empty());
    }

    #[tokio::test]
    async fn execute_reports_progress_and_failures() {
        let f = fixture();
        f.provisioner.fail_for("bob");
        let mut out = Vec::new();

        let err = BulkCommand::new(&f.manager)
            .create(&mut out, &table(), "alice\nbob\ncarol\n", true)
            .await
            .expect_err("one item failed");

        assert!(matches!(
            err,
            CliError::Registry(wgpeer_core::RegistryError::PartialFailure { succeeded: 2, failed: 1 })
        ));
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("[1/3] ✓ alice"));
        assert!(text.contains("[2/3] ✗ bob"));
        assert!(text.contains("2 succeeded, 1 failed, 3 total"));
    }

    #[tokio::test]
    async fn delete_all_in_json_mode() {
        let f = fixture();
        let mut out = Vec::new();
        BulkCommand::new(&f.manager)
            .create(&mut out, &table(), "alice\nbob\n", true)
            .await
            .expect("created");

        let mut json = Vec::new();
        BulkCommand::new(&f.manager)
            .delete(&mut json, &OutputFormat::new(Format::Json), "*\n", true)
            .await
            .expect("deleted");

        let value: serde_json::Value = serde_json::from_slice(&json).expect("pure json");
        assert_eq!(value["succeeded"], 2);
        assert!(f.manager.list().expect("scan").is_empty());
    }
}
