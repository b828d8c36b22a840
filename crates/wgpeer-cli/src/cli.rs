//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Manage the client peers of a `WireGuard` server.
#[derive(Parser, Debug, Clone)]
#[command(name = "wgpeer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Registry configuration file (TOML). Built-in defaults apply when absent.
    #[arg(short, long, env = "WGPEER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List every peer found in the config directory.
    List,

    /// Show the free addresses.
    Available,

    /// Create a peer.
    Add {
        /// Peer name; unusable characters are replaced with `_`.
        name: String,

        /// Final address octet (2-254). The lowest free one when omitted.
        #[arg(long)]
        octet: Option<u8>,
    },

    /// Delete a peer and restart the interface.
    Remove {
        /// Peer name.
        name: String,
    },

    /// Create peers from a manifest of `name` or `name:octet` lines.
    BulkAdd(BulkArgs),

    /// Delete peers listed in a manifest (`*` or `all` selects every peer).
    BulkRemove(BulkArgs),

    /// Export the full configuration to a JSON file.
    Backup {
        /// Destination file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace the live configuration with a backup.
    ///
    /// The current state is copied aside first.
    Restore {
        /// Backup file.
        file: PathBuf,

        /// New public host for client `Endpoint` lines.
        #[arg(long)]
        endpoint: Option<String>,

        /// Actually restore instead of describing the backup.
        #[arg(short, long)]
        yes: bool,
    },

    /// Check that a backup file is restorable.
    CheckBackup {
        /// Backup file.
        file: PathBuf,
    },
}

/// Arguments shared by the bulk commands.
#[derive(Args, Debug, Clone)]
pub struct BulkArgs {
    /// Manifest file, or `-` for stdin.
    pub manifest: PathBuf,

    /// Execute the plan instead of only printing it.
    #[arg(short, long)]
    pub yes: bool,
}

impl BulkArgs {
    /// Whether the manifest comes from stdin.
    #[must_use]
    pub fn reads_stdin(&self) -> bool {
        self.manifest.as_os_str() == "-"
    }
}
