//! Single-peer commands: list, available, add, remove.

use std::io::Write;

use wgpeer_core::{DeleteOutcome, InterfaceControl, PeerManager, Provisioner};

use crate::error::CliError;
use crate::output::{AvailableOctets, OutputFormat, PeerList};

/// Single-peer command executor.
pub struct PeerCommand<'a, P, C> {
    manager: &'a PeerManager<P, C>,
}

impl<'a, P: Provisioner, C: InterfaceControl> PeerCommand<'a, P, C> {
    /// Create a new peer command.
    #[must_use]
    pub fn new(manager: &'a PeerManager<P, C>) -> Self {
        Self { manager }
    }

    /// List every peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be read.
    pub fn list<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let registry = self.manager.list()?;
        format.write(writer, &PeerList::from(&registry))
    }

    /// Show the free octets.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be read.
    pub fn available<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let available = AvailableOctets {
            subnet: self.manager.config().subnet_prefix.clone(),
            octets: self.manager.available()?,
        };
        format.write(writer, &available)
    }

    /// Create a peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or octet is rejected or provisioning fails.
    pub async fn add<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        name: &str,
        octet: Option<u8>,
    ) -> Result<(), CliError> {
        let peer = self.manager.add_peer(name, octet).await?;
        format.write(writer, &peer)
    }

    /// Delete a peer. Any failed step makes the command fail after the
    /// report is printed.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer does not exist or a step failed.
    pub async fn remove<W: Write>(&self, writer: &mut W, format: &OutputFormat, name: &str) -> Result<(), CliError> {
        let report = self.manager.remove_peer(name).await?;
        format.write(writer, &report)?;
        match report.outcome() {
            DeleteOutcome::FullSuccess => Ok(()),
            _ => Err(CliError::Incomplete(report.error_summary())),
        }
    }
}
