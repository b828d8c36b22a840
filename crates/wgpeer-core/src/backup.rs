//! Full backup and restore of the peer set.
//!
//! A snapshot carries the server document and keys, every client's config and
//! keys, and the auxiliary variable files. Restoring is destructive, so the
//! current state is copied aside first; that copy is best-effort and never
//! blocks the restore.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{RegistryConfig, LOCK_FILE};
use crate::error::{RegistryError, Result};
use crate::lock::RegistryGuard;
use crate::peer::validate_name;
use crate::scanner::ConfigScanner;
use crate::tools::InterfaceControl;

/// Schema version written by [`snapshot`].
pub const BACKUP_VERSION: u32 = 1;
/// Default export file name.
pub const DEFAULT_EXPORT_FILE: &str = "wg_config_export.json";
/// Top-level fields a document must carry to be restorable.
pub const REQUIRED_FIELDS: [&str; 4] = ["version", "created", "server_config", "clients"];

const MODE_SECRET: u32 = 0o600;
const MODE_PUBLIC: u32 = 0o644;
const ENDPOINT_VAR: &str = "ip_address_glob=";

/// Server side of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerBackup {
    /// Text of the server document.
    #[serde(default)]
    pub config_content: String,
    /// Server private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privatekey: Option<String>,
    /// Server public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publickey: Option<String>,
}

/// One client in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientBackup {
    /// Client address.
    pub ip: String,
    /// Final octet of the address.
    pub octet: u8,
    /// Text of `<name>_cl.conf`.
    pub config_content: String,
    /// Client private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privatekey: Option<String>,
    /// Client public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publickey: Option<String>,
}

/// A versioned capture of the whole registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// Schema version.
    pub version: u32,
    /// RFC 3339 creation time.
    pub created: String,
    /// Server document and keys.
    pub server_config: ServerBackup,
    /// Clients by name.
    pub clients: BTreeMap<String, ClientBackup>,
    /// Auxiliary files by their configured path.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl BackupSnapshot {
    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Json` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a document after checking its required fields.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if a required field is missing, `Json` if the text
    /// is not JSON or a field has the wrong shape.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let missing = missing_fields(&value);
        if !missing.is_empty() {
            return Err(RegistryError::validation(format!(
                "backup is missing required field(s): {}",
                missing.join(", ")
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Writes the snapshot to `path`, readable by the owner only.
    ///
    /// # Errors
    ///
    /// Returns `Json` or `Io` on failure.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_file(path, &self.to_json()?, Some(MODE_SECRET))
    }

    /// Reads and validates a snapshot from `path`.
    ///
    /// # Errors
    ///
    /// Returns `Io`, `Json` or `Validation` on failure.
    pub fn read_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| RegistryError::io(path, e))?;
        Self::from_json(&text)
    }
}

fn missing_fields(value: &serde_json::Value) -> Vec<&'static str> {
    REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| value.get(field).is_none_or(serde_json::Value::is_null))
        .collect()
}

/// Returns `true` if the document has every required top-level field.
///
/// Everything else is accepted as-is.
#[must_use]
pub fn validate(doc: &serde_json::Value) -> bool {
    doc.is_object() && missing_fields(doc).is_empty()
}

/// Captures the current state.
///
/// # Errors
///
/// Returns `Io` if the server document or a client config cannot be read.
pub fn snapshot(config: &RegistryConfig) -> Result<BackupSnapshot> {
    let server_document = config.server_document();
    let server_config = ServerBackup {
        config_content: fs::read_to_string(&server_document)
            .map_err(|e| RegistryError::io(&server_document, e))?,
        privatekey: read_optional(&config.server_private_key())?,
        publickey: read_optional(&config.server_public_key())?,
    };

    let registry = ConfigScanner::new(config).scan()?;
    let mut clients = BTreeMap::new();
    for peer in registry.peers() {
        let config_content = fs::read_to_string(&peer.config_file)
            .map_err(|e| RegistryError::io(&peer.config_file, e))?;
        clients.insert(
            peer.name.clone(),
            ClientBackup {
                ip: peer.address.clone(),
                octet: peer.octet,
                config_content,
                privatekey: read_optional(&config.client_private_key(&peer.name))?,
                publickey: read_optional(&config.client_public_key(&peer.name))?,
            },
        );
    }

    let mut variables = BTreeMap::new();
    for path in [&config.summary_file, &config.variables_file] {
        if let Some(content) = read_optional(path)? {
            variables.insert(path.display().to_string(), content);
        }
    }

    info!(clients = clients.len(), "captured backup snapshot");
    Ok(BackupSnapshot {
        version: BACKUP_VERSION,
        created: Utc::now().to_rfc3339(),
        server_config,
        clients,
        variables,
    })
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RegistryError::io(path, e)),
    }
}

fn write_file(path: &Path, content: &str, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| RegistryError::io(parent, e))?;
    }
    fs::write(path, content).map_err(|e| RegistryError::io(path, e))?;
    match mode {
        Some(mode) => set_mode(path, mode),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| RegistryError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Knobs for [`restore`].
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// New public host; rewrites client `Endpoint` lines and `ip_address_glob`.
    pub endpoint_host: Option<String>,
}

/// A part of the snapshot that could not be written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreFailure {
    /// Client name, or `server` / a variable file path.
    pub item: String,
    /// What went wrong.
    pub error: String,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Clients written back.
    pub restored: usize,
    /// Clients in the snapshot.
    pub total: usize,
    /// Write failures.
    pub failures: Vec<RestoreFailure>,
    /// Where the previous state was copied, if that worked.
    pub safety_copy: Option<PathBuf>,
    /// The interface failed to come back up. Files may still be restored.
    pub interface_error: Option<String>,
}

impl RestoreReport {
    fn fail(&mut self, item: impl Into<String>, error: &RegistryError) {
        let item = item.into();
        warn!(%item, error = %error, "restore write failed");
        self.failures.push(RestoreFailure {
            item,
            error: error.to_string(),
        });
    }

    /// Every file was written and the interface is up.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.interface_error.is_none() && self.restored == self.total
    }
}

/// Replaces the live state with `snapshot`.
///
/// # Errors
///
/// Returns an error only if the snapshot names an unusable client; write and
/// interface failures are reported in the [`RestoreReport`].
pub async fn restore<C: InterfaceControl>(
    config: &RegistryConfig,
    control: &C,
    _guard: &RegistryGuard<'_>,
    snapshot: &BackupSnapshot,
    options: &RestoreOptions,
) -> Result<RestoreReport> {
    for name in snapshot.clients.keys() {
        validate_name(name)?;
    }

    let mut report = RestoreReport {
        total: snapshot.clients.len(),
        ..RestoreReport::default()
    };

    if let Err(e) = control.down().await {
        warn!(error = %e, "interface did not stop before restore");
    }

    match copy_aside(config) {
        Ok(path) => report.safety_copy = Some(path),
        Err(e) => warn!(error = %e, "safety copy failed, restoring anyway"),
    }

    if let Err(e) = clear_config_dir(&config.config_dir) {
        report.fail("config directory", &e);
    }

    let server = &snapshot.server_config;
    if let Err(e) = write_file(&config.server_document(), &server.config_content, Some(MODE_SECRET)) {
        report.fail("server", &e);
    }
    if let Some(key) = &server.privatekey {
        if let Err(e) = write_file(&config.server_private_key(), key, Some(MODE_SECRET)) {
            report.fail("server private key", &e);
        }
    }
    if let Some(key) = &server.publickey {
        if let Err(e) = write_file(&config.server_public_key(), key, Some(MODE_PUBLIC)) {
            report.fail("server public key", &e);
        }
    }

    let endpoint = options
        .endpoint_host
        .as_deref()
        .map(|host| format!("{host}:{}", config.listen_port));

    for (name, client) in &snapshot.clients {
        let content = match &endpoint {
            Some(endpoint) => rewrite_endpoint(&client.config_content, endpoint),
            None => client.config_content.clone(),
        };
        if let Err(e) = write_file(&config.client_config(name), &content, Some(MODE_SECRET)) {
            report.fail(name.as_str(), &e);
            continue;
        }
        report.restored += 1;

        if let Some(key) = &client.privatekey {
            if let Err(e) = write_file(&config.client_private_key(name), key, Some(MODE_SECRET)) {
                report.fail(format!("{name} private key"), &e);
            }
        }
        if let Some(key) = &client.publickey {
            if let Err(e) = write_file(&config.client_public_key(name), key, Some(MODE_PUBLIC)) {
                report.fail(format!("{name} public key"), &e);
            }
        }
    }

    for (key, content) in &snapshot.variables {
        let Some(target) = variable_target(config, key) else {
            warn!(variable = %key, "ignoring unknown variable file in backup");
            continue;
        };
        let content = match (&options.endpoint_host, target == config.variables_file) {
            (Some(host), true) => rewrite_endpoint_var(content, host),
            _ => content.clone(),
        };
        if let Err(e) = write_file(&target, &content, None) {
            report.fail(key.as_str(), &e);
        }
    }

    if let Err(e) = control.up().await {
        warn!(error = %e, "interface failed to start after restore");
        report.interface_error = Some(e.to_string());
    }

    info!(
        restored = report.restored,
        total = report.total,
        failures = report.failures.len(),
        "restore finished"
    );
    Ok(report)
}

fn variable_target(config: &RegistryConfig, key: &str) -> Option<PathBuf> {
    let key_path = Path::new(key);
    [&config.summary_file, &config.variables_file]
        .into_iter()
        .find(|path| {
            key_path == path.as_path()
                || (key_path.file_name().is_some() && key_path.file_name() == path.file_name())
        })
        .cloned()
}

fn copy_aside(config: &RegistryConfig) -> Result<PathBuf> {
    let target = config.backup_dir.join(format!(
        "pre-restore-{}",
        Utc::now().format("%Y%m%d-%H%M%S%.3f")
    ));
    fs::create_dir_all(&target).map_err(|e| RegistryError::io(&target, e))?;

    if config.config_dir.is_dir() {
        let entries = fs::read_dir(&config.config_dir).map_err(|e| RegistryError::io(&config.config_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| RegistryError::io(&config.config_dir, e))?;
            let path = entry.path();
            if !path.is_file() || entry.file_name() == LOCK_FILE {
                continue;
            }
            let dest = target.join(entry.file_name());
            fs::copy(&path, &dest).map_err(|e| RegistryError::io(&path, e))?;
        }
    }

    for path in [&config.summary_file, &config.variables_file] {
        if let Some(name) = path.file_name().filter(|_| path.is_file()) {
            let dest = target.join(name);
            fs::copy(path, &dest).map_err(|e| RegistryError::io(path, e))?;
        }
    }

    info!(safety_copy = %target.display(), "copied current state aside");
    Ok(target)
}

fn clear_config_dir(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(RegistryError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| RegistryError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() && entry.file_name() != LOCK_FILE {
            fs::remove_file(&path).map_err(|e| RegistryError::io(&path, e))?;
        }
    }
    Ok(())
}

/// Points every `Endpoint` line at `endpoint` (`host:port`).
#[must_use]
pub fn rewrite_endpoint(config_text: &str, endpoint: &str) -> String {
    config_text
        .split_inclusive('\n')
        .map(|line| {
            let is_endpoint = line
                .trim_start()
                .split_once('=')
                .is_some_and(|(key, _)| key.trim() == "Endpoint");
            if is_endpoint {
                let ending = if line.ends_with("\r\n") {
                    "\r\n"
                } else if line.ends_with('\n') {
                    "\n"
                } else {
                    ""
                };
                format!("Endpoint = {endpoint}{ending}")
            } else {
                line.to_string()
            }
        })
        .collect()
}

/// Replaces the `ip_address_glob=` line of the variables file.
#[must_use]
pub fn rewrite_endpoint_var(variables: &str, host: &str) -> String {
    let mut out: String = variables
        .split_inclusive('\n')
        .filter(|line| !line.starts_with(ENDPOINT_VAR))
        .collect();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(ENDPOINT_VAR);
    out.push_str(host);
    out.push('\n');
    out
}
