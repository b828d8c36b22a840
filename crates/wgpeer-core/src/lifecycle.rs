//! Creation and deletion of a single peer.
//!
//! Creation is all-or-nothing: the provisioning tool either produces the
//! client config or the peer does not exist. Deletion is cumulative: every
//! cleanup step runs even if an earlier one failed, and the report says which
//! steps did what.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::lock::RegistryGuard;
use crate::peer::{validate_name, PeerConfig};
use crate::scanner::ConfigScanner;
use crate::server_doc::remove_peer_stanza_in_file;
use crate::summary;
use crate::tools::{InterfaceControl, Provisioner};

/// Terminal state of a peer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    /// The peer's config file exists.
    Created,
    /// At least one cleanup step removed something.
    Deleted,
    /// Nothing was achieved.
    Failed,
}

/// One step of a deletion, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStep {
    /// Remove the `[Peer]` stanza from the server document.
    ServerStanza,
    /// Delete `<name>_cl.conf`.
    ClientConfig,
    /// Delete `<name>_privatekey` and `<name>_publickey`.
    KeyFiles,
    /// Drop the peer's lines from the summary file.
    Summary,
    /// `down` then `up` on the interface.
    InterfaceCycle,
}

impl fmt::Display for DeleteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ServerStanza => "server stanza",
            Self::ClientConfig => "client config",
            Self::KeyFiles => "key files",
            Self::Summary => "summary file",
            Self::InterfaceCycle => "interface restart",
        };
        f.write_str(label)
    }
}

/// What happened in one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepStatus {
    /// The step changed something.
    Done,
    /// Nothing to do (e.g. the file was already gone).
    Skipped(String),
    /// The step failed.
    Failed(String),
}

/// A step and its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// The step.
    pub step: DeleteStep,
    /// Its status.
    pub status: StepStatus,
}

/// Aggregate result of a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// No step failed.
    FullSuccess,
    /// Some steps failed, at least one removed something.
    PartialSuccess,
    /// No step removed anything.
    Failure,
}

/// Per-step account of a deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    /// Peer name.
    pub name: String,
    /// Peer address at the time of deletion.
    pub address: String,
    /// Steps in execution order.
    pub steps: Vec<StepOutcome>,
}

impl DeleteReport {
    fn new(peer: &PeerConfig) -> Self {
        Self {
            name: peer.name.clone(),
            address: peer.address.clone(),
            steps: Vec::new(),
        }
    }

    fn record(&mut self, step: DeleteStep, result: Result<StepStatus>) {
        let status = result.unwrap_or_else(|e| StepStatus::Failed(e.to_string()));
        if let StepStatus::Failed(reason) = &status {
            warn!(peer = %self.name, %step, %reason, "deletion step failed");
        }
        self.steps.push(StepOutcome { step, status });
    }

    /// Aggregate outcome.
    #[must_use]
    pub fn outcome(&self) -> DeleteOutcome {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .count();
        let failed = self.errors().count();
        match (done, failed) {
            (_, 0) => DeleteOutcome::FullSuccess,
            (0, _) => DeleteOutcome::Failure,
            _ => DeleteOutcome::PartialSuccess,
        }
    }

    /// Terminal state of the peer.
    #[must_use]
    pub fn state(&self) -> PeerState {
        match self.outcome() {
            DeleteOutcome::Failure => PeerState::Failed,
            _ => PeerState::Deleted,
        }
    }

    /// Failed steps with their reasons.
    pub fn errors(&self) -> impl Iterator<Item = (DeleteStep, &str)> {
        self.steps.iter().filter_map(|s| match &s.status {
            StepStatus::Failed(reason) => Some((s.step, reason.as_str())),
            _ => None,
        })
    }

    /// One-line description of every failure, for callers that need a string.
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.errors()
            .map(|(step, reason)| format!("{step}: {reason}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Drives the provisioning tool and the cleanup steps for one peer.
#[derive(Debug, Clone)]
pub struct ClientLifecycleManager<P, C> {
    config: RegistryConfig,
    provisioner: P,
    control: C,
}

impl<P: Provisioner, C: InterfaceControl> ClientLifecycleManager<P, C> {
    /// Creates a manager over the configured layout.
    #[must_use]
    pub fn new(config: RegistryConfig, provisioner: P, control: C) -> Self {
        Self {
            config,
            provisioner,
            control,
        }
    }

    /// The registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The interface controller.
    #[must_use]
    pub fn control(&self) -> &C {
        &self.control
    }

    /// Provisions `name` at `octet`.
    ///
    /// The octet must already have been allocated under the same guard.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a bad name and `ExternalTool` if the tool fails
    /// or exits cleanly without producing a usable client config.
    pub async fn create(&self, _guard: &RegistryGuard<'_>, name: &str, octet: u8) -> Result<PeerConfig> {
        validate_name(name)?;
        self.provisioner.create(name, octet).await?;

        let config_file = self.config.client_config(name);
        if !config_file.is_file() {
            return Err(RegistryError::external_tool(
                format!("provision {name} {octet}"),
                format!("exited cleanly but {} was not written", config_file.display()),
            ));
        }

        let registry = ConfigScanner::new(&self.config).scan()?;
        let peer = registry.get(name).cloned().ok_or_else(|| {
            RegistryError::external_tool(
                format!("provision {name} {octet}"),
                format!("{} has no usable Address line", config_file.display()),
            )
        })?;

        info!(peer = %peer.name, address = %peer.address, "peer created");
        Ok(peer)
    }

    /// Removes every trace of `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such peer exists. Step failures do not error;
    /// they are reported in the returned [`DeleteReport`].
    pub async fn delete(&self, guard: &RegistryGuard<'_>, name: &str) -> Result<DeleteReport> {
        let registry = ConfigScanner::new(&self.config).scan()?;
        let peer = registry
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(format!("peer {name}")))?;
        Ok(self.delete_peer(guard, &peer, true).await)
    }

    /// Runs the cleanup steps for an already-scanned peer.
    ///
    /// With `cycle_interface` false the interface step is left out, so a
    /// batch can restart the interface once at the end.
    pub async fn delete_peer(
        &self,
        _guard: &RegistryGuard<'_>,
        peer: &PeerConfig,
        cycle_interface: bool,
    ) -> DeleteReport {
        let mut report = DeleteReport::new(peer);

        report.record(
            DeleteStep::ServerStanza,
            remove_peer_stanza_in_file(&self.config.server_document(), &peer.address)
                .map(|()| StepStatus::Done),
        );

        report.record(DeleteStep::ClientConfig, remove_file(&peer.config_file));

        let private = remove_file(&self.config.client_private_key(&peer.name));
        let public = remove_file(&self.config.client_public_key(&peer.name));
        report.record(DeleteStep::KeyFiles, merge_key_steps(private, public));

        report.record(
            DeleteStep::Summary,
            summary::remove_from_file(&self.config.summary_file, &peer.address, &peer.name).map(
                |removed| match removed {
                    None => StepStatus::Skipped("summary file absent".to_string()),
                    Some(0) => StepStatus::Skipped("no summary entry".to_string()),
                    Some(_) => StepStatus::Done,
                },
            ),
        );

        if cycle_interface {
            report.record(DeleteStep::InterfaceCycle, self.cycle_interface().await);
        }

        info!(peer = %peer.name, outcome = ?report.outcome(), "peer deletion finished");
        report
    }

    /// Brings the interface down and back up. `up` runs even if `down` failed.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the two.
    pub async fn cycle_interface(&self) -> Result<StepStatus> {
        let down = self.control.down().await;
        let up = self.control.up().await;
        down.and(up).map(|()| StepStatus::Done)
    }
}

fn remove_file(path: &Path) -> Result<StepStatus> {
    match fs::remove_file(path) {
        Ok(()) => Ok(StepStatus::Done),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Ok(StepStatus::Skipped(format!("{} already absent", path.display())))
        }
        Err(e) => Err(RegistryError::io(path, e)),
    }
}

fn merge_key_steps(private: Result<StepStatus>, public: Result<StepStatus>) -> Result<StepStatus> {
    match (private?, public?) {
        (StepStatus::Skipped(_), StepStatus::Skipped(_)) => {
            Ok(StepStatus::Skipped("no key files".to_string()))
        }
        _ => Ok(StepStatus::Done),
    }
}
