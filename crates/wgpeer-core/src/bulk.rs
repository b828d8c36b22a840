//! Bulk creation and deletion from a text manifest.
//!
//! A manifest is validated as a whole before anything runs: every violation is
//! collected and reported together, and a manifest with any violation executes
//! nothing. Execution is strictly sequential with a pause between items and
//! always runs to the end of the manifest.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::allocator::IpAllocator;
use crate::error::{RegistryError, Result};
use crate::lifecycle::{ClientLifecycleManager, DeleteOutcome};
use crate::lock::RegistryGuard;
use crate::peer::{validate_name, PeerConfig, Registry, MAX_OCTET, MIN_OCTET};
use crate::tools::{InterfaceControl, Provisioner};

/// Lines starting with this are ignored.
pub const COMMENT_MARKER: char = '#';
/// Per-item error messages are cut to this many characters.
pub const MAX_ERROR_LEN: usize = 200;

/// How an item wants its address chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OctetRequest {
    /// Lowest free octet.
    Auto,
    /// This exact octet.
    Explicit(u8),
}

/// One problem found in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestError {
    /// 1-based line number.
    pub line: usize,
    /// What is wrong.
    pub message: String,
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Every violation found in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestErrors(pub Vec<ManifestError>);

impl ManifestErrors {
    fn push(&mut self, line: usize, message: impl Into<String>) {
        self.0.push(ManifestError {
            line,
            message: message.into(),
        });
    }

    /// Messages without line numbers.
    #[must_use]
    pub fn messages(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.message.as_str()).collect()
    }

    /// Number of violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no violations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ManifestErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&lines.join("\n"))
    }
}

impl From<ManifestErrors> for RegistryError {
    fn from(errors: ManifestErrors) -> Self {
        let joined: Vec<String> = errors.0.iter().map(ToString::to_string).collect();
        RegistryError::validation(format!(
            "{} manifest error(s): {}",
            errors.len(),
            joined.join("; ")
        ))
    }
}

/// A validated creation: name and the octet it will get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedCreate {
    /// Peer name.
    pub name: String,
    /// Assigned octet.
    pub octet: u8,
    /// Whether the octet was chosen automatically.
    pub auto: bool,
}

struct RawItem<'a> {
    line: usize,
    name: &'a str,
    octet: Option<&'a str>,
}

fn manifest_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
}

fn split_item(line: usize, text: &str) -> RawItem<'_> {
    match text.split_once(':') {
        Some((name, octet)) => RawItem {
            line,
            name: name.trim(),
            octet: Some(octet.trim()),
        },
        None => RawItem {
            line,
            name: text,
            octet: None,
        },
    }
}

/// Validates a creation manifest against the registry and assigns octets.
///
/// Each line is `name` (automatic address) or `name:octet`.
///
/// # Errors
///
/// Returns every violation found; nothing is planned when there is one.
pub fn plan_create(
    text: &str,
    registry: &Registry,
    allocator: &IpAllocator,
) -> std::result::Result<Vec<PlannedCreate>, ManifestErrors> {
    let mut errors = ManifestErrors::default();
    let mut seen_names: HashMap<&str, usize> = HashMap::new();
    let mut seen_octets: HashMap<u8, usize> = HashMap::new();
    let mut items: Vec<(String, OctetRequest)> = Vec::new();

    for (line, text) in manifest_lines(text) {
        let raw = split_item(line, text);

        if let Err(e) = validate_name(raw.name) {
            errors.push(raw.line, validation_message(&e));
        } else if registry.contains(raw.name) {
            errors.push(raw.line, format!("{} already exists", raw.name));
        }
        if let Some(first) = seen_names.insert(raw.name, raw.line) {
            errors.push(
                raw.line,
                format!("duplicate name {} (first on line {first})", raw.name),
            );
        }

        let request = match raw.octet {
            None => OctetRequest::Auto,
            Some(value) => match value.parse::<u32>() {
                Err(_) => {
                    errors.push(raw.line, format!("invalid octet '{value}' for {}", raw.name));
                    continue;
                }
                Ok(n) if n < u32::from(MIN_OCTET) || n > u32::from(MAX_OCTET) => {
                    errors.push(
                        raw.line,
                        format!("octet {n} out of range {MIN_OCTET}-{MAX_OCTET}"),
                    );
                    continue;
                }
                Ok(n) => {
                    let octet = u8::try_from(n).unwrap_or(MAX_OCTET);
                    if let Some(first) = seen_octets.insert(octet, raw.line) {
                        errors.push(
                            raw.line,
                            format!("duplicate octet {octet} (first on line {first})"),
                        );
                    } else if registry.is_octet_used(octet) {
                        errors.push(raw.line, format!("octet {octet} already in use"));
                    }
                    OctetRequest::Explicit(octet)
                }
            },
        };

        items.push((raw.name.to_string(), request));
    }

    if items.is_empty() && errors.is_empty() {
        errors.push(0, "manifest contains no peers");
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let mut reserved: Vec<u8> = seen_octets.keys().copied().collect();
    let mut plan = Vec::with_capacity(items.len());
    for (name, request) in items {
        match request {
            OctetRequest::Explicit(octet) => plan.push(PlannedCreate {
                name,
                octet,
                auto: false,
            }),
            OctetRequest::Auto => match allocator.allocate_excluding(registry, None, &reserved) {
                Ok(octet) => {
                    reserved.push(octet);
                    plan.push(PlannedCreate {
                        name,
                        octet,
                        auto: true,
                    });
                }
                Err(_) => errors.push(
                    seen_names.get(name.as_str()).copied().unwrap_or(0),
                    format!("no free address left for {name}"),
                ),
            },
        }
    }

    if errors.is_empty() {
        Ok(plan)
    } else {
        Err(errors)
    }
}

/// Validates a deletion manifest against the registry.
///
/// Each line is a peer name; `*` or `all` selects every current peer.
///
/// # Errors
///
/// Returns every violation found; nothing is planned when there is one.
pub fn plan_delete(
    text: &str,
    registry: &Registry,
) -> std::result::Result<Vec<PeerConfig>, ManifestErrors> {
    let mut errors = ManifestErrors::default();
    let mut wildcard = false;
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut selected: Vec<&str> = Vec::new();

    for (line, text) in manifest_lines(text) {
        if text == "*" || text.eq_ignore_ascii_case("all") {
            wildcard = true;
            continue;
        }
        if text.contains(':') {
            errors.push(line, format!("'{text}': deletion takes names only"));
            continue;
        }
        if let Err(e) = validate_name(text) {
            errors.push(line, validation_message(&e));
            continue;
        }
        if let Some(first) = seen.insert(text, line) {
            errors.push(line, format!("duplicate name {text} (first on line {first})"));
            continue;
        }
        if !registry.contains(text) {
            errors.push(line, format!("{text} not found"));
            continue;
        }
        selected.push(text);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let plan: Vec<PeerConfig> = if wildcard {
        registry.peers().cloned().collect()
    } else {
        selected
            .into_iter()
            .filter_map(|name| registry.get(name).cloned())
            .collect()
    };

    if plan.is_empty() {
        errors.push(0, "manifest selects no peers");
        return Err(errors);
    }
    Ok(plan)
}

fn validation_message(err: &RegistryError) -> String {
    match err {
        RegistryError::Validation { message } => message.clone(),
        other => other.to_string(),
    }
}

/// Result for one manifest item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemResult {
    /// Peer name.
    pub name: String,
    /// Address involved, if known.
    pub address: Option<String>,
    /// Whether the item succeeded.
    pub ok: bool,
    /// Truncated failure reason.
    pub error: Option<String>,
}

/// Aggregate of a bulk run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    /// Items in the manifest.
    pub total: usize,
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Per-item results in manifest order.
    pub items: Vec<BulkItemResult>,
    /// Failure of the closing interface restart (deletion only).
    pub interface_error: Option<String>,
}

impl BulkReport {
    fn push(&mut self, item: BulkItemResult) {
        if item.ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.items.push(item);
    }

    /// Items that failed, with their reasons.
    pub fn failures(&self) -> impl Iterator<Item = &BulkItemResult> {
        self.items.iter().filter(|i| !i.ok)
    }

    /// `Ok` when every item succeeded.
    ///
    /// # Errors
    ///
    /// Returns `PartialFailure` with the counts otherwise.
    pub fn check(&self) -> Result<()> {
        if self.failed == 0 && self.interface_error.is_none() {
            Ok(())
        } else {
            Err(RegistryError::PartialFailure {
                succeeded: self.succeeded,
                failed: self.failed,
            })
        }
    }
}

/// Cuts `message` to [`MAX_ERROR_LEN`] characters.
#[must_use]
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(MAX_ERROR_LEN - 3).collect();
    cut.push_str("...");
    cut
}

/// Runs validated plans one item at a time.
#[derive(Debug, Clone, Copy)]
pub struct BulkExecutor {
    delay: Duration,
}

impl BulkExecutor {
    /// Creates an executor that pauses `delay` between items.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Creates every planned peer. `progress` is called after each item with
    /// its position, the total, and its result.
    pub async fn create<P, C, F>(
        &self,
        manager: &ClientLifecycleManager<P, C>,
        guard: &RegistryGuard<'_>,
        plan: &[PlannedCreate],
        mut progress: F,
    ) -> BulkReport
    where
        P: Provisioner,
        C: InterfaceControl,
        F: FnMut(usize, usize, &BulkItemResult),
    {
        let mut report = BulkReport {
            total: plan.len(),
            ..BulkReport::default()
        };

        for (index, item) in plan.iter().enumerate() {
            if index > 0 {
                self.pause().await;
            }
            let result = match manager.create(guard, &item.name, item.octet).await {
                Ok(peer) => BulkItemResult {
                    name: item.name.clone(),
                    address: Some(peer.address),
                    ok: true,
                    error: None,
                },
                Err(e) => {
                    warn!(peer = %item.name, octet = item.octet, error = %e, "bulk create item failed");
                    BulkItemResult {
                        name: item.name.clone(),
                        address: Some(manager.config().address_for(item.octet)),
                        ok: false,
                        error: Some(truncate_error(&e.to_string())),
                    }
                }
            };
            progress(index + 1, plan.len(), &result);
            report.push(result);
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "bulk create finished"
        );
        report
    }

    /// Deletes every planned peer, then restarts the interface once.
    ///
    /// A peer counts as deleted unless its deletion achieved nothing.
    pub async fn delete<P, C, F>(
        &self,
        manager: &ClientLifecycleManager<P, C>,
        guard: &RegistryGuard<'_>,
        plan: &[PeerConfig],
        mut progress: F,
    ) -> BulkReport
    where
        P: Provisioner,
        C: InterfaceControl,
        F: FnMut(usize, usize, &BulkItemResult),
    {
        let mut report = BulkReport {
            total: plan.len(),
            ..BulkReport::default()
        };

        for (index, peer) in plan.iter().enumerate() {
            if index > 0 {
                self.pause().await;
            }
            let deletion = manager.delete_peer(guard, peer, false).await;
            let errors = deletion.error_summary();
            let result = BulkItemResult {
                name: peer.name.clone(),
                address: Some(peer.address.clone()),
                ok: deletion.outcome() != DeleteOutcome::Failure,
                error: (!errors.is_empty()).then(|| truncate_error(&errors)),
            };
            progress(index + 1, plan.len(), &result);
            report.push(result);
        }

        if report.succeeded > 0 {
            if let Err(e) = manager.cycle_interface().await {
                warn!(error = %e, "interface restart after bulk delete failed");
                report.interface_error = Some(truncate_error(&e.to_string()));
            }
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "bulk delete finished"
        );
        report
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}
