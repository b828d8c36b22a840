//! Command implementations for the wgpeer CLI.

use std::io::{self, Read, Write};
use std::path::Path;

use tracing::debug;
use wgpeer_core::{InterfaceControl, PeerManager, Provisioner, RegistryConfig};

use crate::cli::{BulkArgs, Commands};
use crate::error::CliError;
use crate::output::OutputFormat;

mod backup;
mod bulk;
mod peer;

pub use backup::BackupCommand;
pub use bulk::BulkCommand;
pub use peer::PeerCommand;

/// Loads the registry configuration, or the defaults when no file is given.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is invalid.
pub fn load_config(path: Option<&Path>) -> Result<RegistryConfig, CliError> {
    let config = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            RegistryConfig::from_file(path)?
        }
        None => {
            let config = RegistryConfig::default();
            config.validate()?;
            config
        }
    };
    Ok(config)
}

/// Reads a manifest from its file or from stdin.
///
/// # Errors
///
/// Returns an error if reading fails.
pub fn read_manifest(args: &BulkArgs) -> Result<String, CliError> {
    if args.reads_stdin() {
        let mut text = String::new();
        io::stdin().lock().read_to_string(&mut text)?;
        Ok(text)
    } else {
        Ok(std::fs::read_to_string(&args.manifest)?)
    }
}

/// Runs one subcommand against `manager`.
///
/// # Errors
///
/// Returns an error if the command fails or did not fully succeed.
pub async fn dispatch<P, C, W>(
    manager: &PeerManager<P, C>,
    command: &Commands,
    writer: &mut W,
    format: &OutputFormat,
) -> Result<(), CliError>
where
    P: Provisioner,
    C: InterfaceControl,
    W: Write,
{
    match command {
        Commands::List => PeerCommand::new(manager).list(writer, format),
        Commands::Available => PeerCommand::new(manager).available(writer, format),
        Commands::Add { name, octet } => PeerCommand::new(manager).add(writer, format, name, *octet).await,
        Commands::Remove { name } => PeerCommand::new(manager).remove(writer, format, name).await,
        Commands::BulkAdd(args) => {
            let manifest = read_manifest(args)?;
            BulkCommand::new(manager)
                .create(writer, format, &manifest, args.yes)
                .await
        }
        Commands::BulkRemove(args) => {
            let manifest = read_manifest(args)?;
            BulkCommand::new(manager)
                .delete(writer, format, &manifest, args.yes)
                .await
        }
        Commands::Backup { output } => {
            BackupCommand::new(manager)
                .backup(writer, format, output.as_deref())
                .await
        }
        Commands::Restore { file, endpoint, yes } => {
            BackupCommand::new(manager)
                .restore(writer, format, file, endpoint.as_deref(), *yes)
                .await
        }
        Commands::CheckBackup { file } => BackupCommand::new(manager).check(writer, format, file),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::fs;
    use std::time::Duration;

    use tempfile::TempDir;
    use wgpeer_core::{FakeInterfaceControl, FakeProvisioner, PeerManager, RegistryConfig};

    pub(crate) struct Fixture {
        pub(crate) dir: TempDir,
        pub(crate) manager: PeerManager<FakeProvisioner, FakeInterfaceControl>,
        pub(crate) provisioner: FakeProvisioner,
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let config = RegistryConfig::new(dir.path().join("wg"))
            .with_summary_file(dir.path().join("cofigs.txt"))
            .with_variables_file(dir.path().join("variables.sh"))
            .with_backup_dir(dir.path().join("backups"))
            .with_bulk_delay(Duration::ZERO);
        fs::create_dir_all(&config.config_dir).expect("dir");
        fs::write(config.server_document(), "[Interface]\nAddress = 10.10.0.1/24\n").expect("doc");

        let provisioner = FakeProvisioner::new(&config);
        let manager = PeerManager::new(config, provisioner.clone(), FakeInterfaceControl::new());
        Fixture {
            dir,
            manager,
            provisioner,
        }
    }
}
