//! wgpeer CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wgpeer_cli::cli::Cli;
use wgpeer_cli::commands::{dispatch, load_config};
use wgpeer_cli::output::OutputFormat;
use wgpeer_core::PeerManager;

const DEFAULT_LOG_FILTER: &str = "wgpeer=info";

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), wgpeer_cli::CliError> {
    let config = load_config(cli.config.as_deref())?;
    let manager = PeerManager::from_config(config)?;
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();
    dispatch(&manager, &cli.command, &mut stdout, &format).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wgpeer_cli::cli::{Commands, Format};

    #[test]
    fn cli_parses_list() {
        let cli = Cli::parse_from(["wgpeer", "list"]);
        assert!(matches!(cli.command, Commands::List));
        assert_eq!(cli.format, Format::Table);
    }

    #[test]
    fn cli_parses_add_with_octet() {
        let cli = Cli::parse_from(["wgpeer", "add", "laptop", "--octet", "42"]);
        match cli.command {
            Commands::Add { name, octet } => {
                assert_eq!(name, "laptop");
                assert_eq!(octet, Some(42));
            }
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_octet_out_of_u8() {
        assert!(Cli::try_parse_from(["wgpeer", "add", "laptop", "--octet", "300"]).is_err());
    }

    #[test]
    fn cli_parses_bulk_from_stdin() {
        let cli = Cli::parse_from(["wgpeer", "bulk-add", "-", "--yes"]);
        match cli.command {
            Commands::BulkAdd(args) => {
                assert!(args.reads_stdin());
                assert!(args.yes);
            }
            other => panic!("expected bulk-add, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_restore() {
        let cli = Cli::parse_from(["wgpeer", "restore", "export.json", "--endpoint", "vpn.example.net"]);
        match cli.command {
            Commands::Restore { file, endpoint, yes } => {
                assert_eq!(file, PathBuf::from("export.json"));
                assert_eq!(endpoint.as_deref(), Some("vpn.example.net"));
                assert!(!yes);
            }
            other => panic!("expected restore, got {other:?}"),
        }
    }

    #[test]
    fn cli_respects_format_and_config_flags() {
        let cli = Cli::parse_from(["wgpeer", "--format", "json", "-c", "/etc/wgpeer.toml", "available"]);
        assert_eq!(cli.format, Format::Json);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/wgpeer.toml")));
    }

    #[tokio::test]
    async fn run_with_missing_config_fails() {
        let cli = Cli::parse_from(["wgpeer", "-c", "/nonexistent/wgpeer.toml", "list"]);
        assert!(run(cli).await.is_err());
    }
}
