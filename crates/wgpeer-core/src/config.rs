//! Registry configuration and on-disk naming convention.
//!
//! Defaults match a stock deployment: configs in `/etc/wireguard`, interface
//! `wg0`, clients addressed as `10.10.0.X`.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Suffix of client config files.
pub const CLIENT_CONFIG_SUFFIX: &str = "_cl.conf";
/// Suffix of client private key files.
pub const CLIENT_PRIVATE_KEY_SUFFIX: &str = "_privatekey";
/// Suffix of client public key files.
pub const CLIENT_PUBLIC_KEY_SUFFIX: &str = "_publickey";
/// Server private key file name.
pub const SERVER_PRIVATE_KEY: &str = "privatekey";
/// Server public key file name.
pub const SERVER_PUBLIC_KEY: &str = "publickey";
/// Name of the advisory lock file inside the config directory.
pub const LOCK_FILE: &str = ".wgpeer.lock";

/// Configuration for the peer registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding server and client configs.
    pub config_dir: PathBuf,
    /// WireGuard interface name; the server document is `<interface>.conf`.
    pub interface: String,
    /// First three components of every client address.
    pub subnet_prefix: String,
    /// Provisioning script invoked as `<script> <name> <octet>`.
    pub provision_script: PathBuf,
    /// Human-readable summary of issued addresses.
    pub summary_file: PathBuf,
    /// Shell variables consumed by the provisioning script.
    pub variables_file: PathBuf,
    /// Where pre-restore safety copies are written.
    pub backup_dir: PathBuf,
    /// Server listen port, used when rewriting client endpoints.
    pub listen_port: u16,
    /// Upper bound for any external tool invocation.
    pub tool_timeout_secs: u64,
    /// Pause between items of a bulk operation.
    pub bulk_delay_ms: u64,
    /// How long to wait for another process to release the registry lock.
    pub lock_timeout_secs: u64,
    /// Lifetime of a pending-creation session.
    pub session_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/wireguard"),
            interface: "wg0".to_string(),
            subnet_prefix: "10.10.0".to_string(),
            provision_script: PathBuf::from("scripts/add_cl.sh"),
            summary_file: PathBuf::from("cofigs.txt"),
            variables_file: PathBuf::from("scripts/variables.sh"),
            backup_dir: PathBuf::from("/var/backups/wgpeer"),
            listen_port: 51830,
            tool_timeout_secs: 60,
            bulk_delay_ms: 500,
            lock_timeout_secs: 10,
            session_ttl_secs: 300,
        }
    }
}

impl RegistryConfig {
    /// Creates a config rooted at `config_dir` with all other values defaulted.
    #[must_use]
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the summary file.
    #[must_use]
    pub fn with_summary_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_file = path.into();
        self
    }

    /// Sets the variables file.
    #[must_use]
    pub fn with_variables_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.variables_file = path.into();
        self
    }

    /// Sets the safety-copy directory.
    #[must_use]
    pub fn with_backup_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_dir = path.into();
        self
    }

    /// Sets the pause between bulk items.
    #[must_use]
    pub fn with_bulk_delay(mut self, delay: Duration) -> Self {
        self.bulk_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RegistryError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RegistryError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty()
            || !self
                .interface
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(RegistryError::Config(format!(
                "interface name '{}' must be non-empty and alphanumeric",
                self.interface
            )));
        }

        let candidate = format!("{}.0", self.subnet_prefix);
        if self.subnet_prefix.split('.').count() != 3 || candidate.parse::<Ipv4Addr>().is_err() {
            return Err(RegistryError::Config(format!(
                "subnet_prefix '{}' must be three dotted octets",
                self.subnet_prefix
            )));
        }

        if self.tool_timeout_secs == 0 {
            return Err(RegistryError::Config(
                "tool_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.session_ttl_secs == 0 {
            return Err(RegistryError::Config(
                "session_ttl_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Full client address for an octet.
    #[must_use]
    pub fn address_for(&self, octet: u8) -> String {
        format!("{}.{octet}", self.subnet_prefix)
    }

    /// Path of the server peer-list document.
    #[must_use]
    pub fn server_document(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.interface))
    }

    /// Path of the server private key.
    #[must_use]
    pub fn server_private_key(&self) -> PathBuf {
        self.config_dir.join(SERVER_PRIVATE_KEY)
    }

    /// Path of the server public key.
    #[must_use]
    pub fn server_public_key(&self) -> PathBuf {
        self.config_dir.join(SERVER_PUBLIC_KEY)
    }

    /// Path of a client's config file.
    #[must_use]
    pub fn client_config(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{name}{CLIENT_CONFIG_SUFFIX}"))
    }

    /// Path of a client's private key.
    #[must_use]
    pub fn client_private_key(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{name}{CLIENT_PRIVATE_KEY_SUFFIX}"))
    }

    /// Path of a client's public key.
    #[must_use]
    pub fn client_public_key(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{name}{CLIENT_PUBLIC_KEY_SUFFIX}"))
    }

    /// Path of the registry lock file.
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.config_dir.join(LOCK_FILE)
    }

    /// External tool timeout.
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Pause between bulk items.
    #[must_use]
    pub fn bulk_delay(&self) -> Duration {
        Duration::from_millis(self.bulk_delay_ms)
    }

    /// Registry lock timeout.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Pending-session lifetime.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}
