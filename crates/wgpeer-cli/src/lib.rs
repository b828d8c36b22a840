//! # wgpeer-cli
//!
//! Command-line front end for the `WireGuard` peer registry.
//!
//! Provides commands for:
//! - Listing peers and free addresses
//! - Creating and deleting single peers
//! - Bulk creation and deletion from a manifest
//! - Backup, validation and restore of the whole configuration
//!
//! Every command runs against a [`wgpeer_core::PeerManager`]; nothing here
//! touches the filesystem layout directly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{BulkArgs, Cli, Commands, Format};
pub use error::CliError;
pub use output::OutputFormat;
