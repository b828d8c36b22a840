//! Rebuilds the registry from client config files.
//!
//! There is no index: the config directory is the only record of which peers
//! exist. A file that cannot be understood is skipped with a warning so one
//! bad entry never hides the rest.

use std::fs;
use std::io::ErrorKind;
use std::net::Ipv4Addr;

use tracing::{debug, warn};

use crate::config::{RegistryConfig, CLIENT_CONFIG_SUFFIX};
use crate::error::{RegistryError, Result};
use crate::peer::{octet_in_range, PeerConfig, Registry};

/// Reads the config directory and reconstructs the registry.
#[derive(Debug, Clone)]
pub struct ConfigScanner<'a> {
    config: &'a RegistryConfig,
}

impl<'a> ConfigScanner<'a> {
    /// Creates a scanner over the configured directory.
    #[must_use]
    pub fn new(config: &'a RegistryConfig) -> Self {
        Self { config }
    }

    /// Scans the config directory.
    ///
    /// A missing directory yields an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an `Io` error only if the directory exists but cannot be listed.
    pub fn scan(&self) -> Result<Registry> {
        let dir = &self.config.config_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "config directory absent, registry is empty");
                return Ok(Registry::new());
            }
            Err(e) => return Err(RegistryError::io(dir, e)),
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|entry| {
                let file_name = entry.file_name().into_string().ok()?;
                let name = file_name.strip_suffix(CLIENT_CONFIG_SUFFIX)?;
                (!name.is_empty()).then(|| name.to_string())
            })
            .collect();
        names.sort();

        let mut registry = Registry::new();
        for name in names {
            let Some(peer) = self.read_peer(&name) else {
                continue;
            };
            if let Err(e) = registry.insert(peer) {
                warn!(peer = %name, error = %e, "skipping peer with clashing address");
            }
        }

        debug!(peers = registry.len(), "scanned peer registry");
        Ok(registry)
    }

    fn read_peer(&self, name: &str) -> Option<PeerConfig> {
        let path = self.config.client_config(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(peer = %name, path = %path.display(), error = %e, "cannot read client config");
                return None;
            }
        };

        let Some(address) = parse_address(&content) else {
            warn!(peer = %name, path = %path.display(), "client config has no usable Address line");
            return None;
        };

        let octet = address.octets()[3];
        if self.config.address_for(octet) != address.to_string() {
            warn!(peer = %name, %address, subnet = %self.config.subnet_prefix, "client address outside the subnet");
            return None;
        }
        if !octet_in_range(octet) {
            warn!(peer = %name, %address, "client address outside the assignable range");
            return None;
        }

        let private_key = self.config.client_private_key(name);
        let public_key = self.config.client_public_key(name);

        Some(PeerConfig {
            name: name.to_string(),
            address: address.to_string(),
            octet,
            config_file: path,
            private_key_file: private_key.is_file().then_some(private_key),
            public_key_file: public_key.is_file().then_some(public_key),
        })
    }
}

/// Extracts the first IPv4 value of the `Address =` line, mask stripped.
#[must_use]
pub fn parse_address(content: &str) -> Option<Ipv4Addr> {
    content.lines().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        if key.trim() != "Address" {
            return None;
        }
        value.split(',').find_map(|item| {
            let item = item.trim();
            let host = item.split_once('/').map_or(item, |(host, _)| host);
            host.parse::<Ipv4Addr>().ok()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::IpAllocator;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(dir: &Path, file: &str, content: &str) {
        fs::write(dir.join(file), content).expect("write file");
    }

    fn client(octet: u8) -> String {
        format!("[Interface]\nPrivateKey = abc=\nAddress = 10.10.0.{octet}/32\nDNS = 1.1.1.1\n")
    }

    #[test]
    fn parse_address_strips_mask() {
        let addr = parse_address("[Interface]\nAddress = 10.10.0.7/24\n").expect("address");
        assert_eq!(addr, Ipv4Addr::new(10, 10, 0, 7));
    }

    #[test]
    fn parse_address_without_mask_and_spacing() {
        let addr = parse_address("Address=10.10.0.9").expect("address");
        assert_eq!(addr.octets()[3], 9);
    }

    #[test]
    fn parse_address_prefers_ipv4_entry() {
        let addr = parse_address("Address = fd00::3/128, 10.10.0.3/32").expect("address");
        assert_eq!(addr, Ipv4Addr::new(10, 10, 0, 3));
    }

    #[test]
    fn parse_address_missing() {
        assert!(parse_address("[Interface]\nPrivateKey = x\n").is_none());
        assert!(parse_address("Address = not-an-ip/32").is_none());
    }

    #[test]
    fn scan_builds_registry() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "alice_cl.conf", &client(10));
        write(dir.path(), "alice_privatekey", "priv");
        write(dir.path(), "bob_cl.conf", &client(20));
        write(dir.path(), "wg0.conf", "[Interface]\nAddress = 10.10.0.1/24\n");
        write(dir.path(), "privatekey", "server");

        let config = RegistryConfig::new(dir.path());
        let registry = ConfigScanner::new(&config).scan().expect("scan");

        assert_eq!(registry.len(), 2);
        let alice = registry.get("alice").expect("alice");
        assert_eq!(alice.address, "10.10.0.10");
        assert_eq!(alice.octet, 10);
        assert!(alice.private_key_file.is_some());
        assert!(alice.public_key_file.is_none());
        assert_eq!(registry.get("bob").expect("bob").octet, 20);
    }

    #[test]
    fn scan_skips_malformed_files() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "good_cl.conf", &client(5));
        write(dir.path(), "noaddr_cl.conf", "[Interface]\nPrivateKey = x\n");
        write(dir.path(), "server_cl.conf", &client(1));
        write(dir.path(), "bcast_cl.conf", &client(255));

        let config = RegistryConfig::new(dir.path());
        let registry = ConfigScanner::new(&config).scan().expect("scan");

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn scan_skips_addresses_outside_subnet() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "stray_cl.conf", "[Interface]\nAddress = 192.168.1.5/32\n");
        write(dir.path(), "good_cl.conf", &client(6));

        let config = RegistryConfig::new(dir.path());
        let registry = ConfigScanner::new(&config).scan().expect("scan");

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["good"]);
        let free = IpAllocator::new(&config.subnet_prefix).available_octets(&registry);
        assert!(free.contains(&5));
        assert!(!free.contains(&6));
    }

    #[test]
    fn scan_keeps_first_of_clashing_octets() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "bravo_cl.conf", &client(8));
        write(dir.path(), "alpha_cl.conf", &client(8));

        let config = RegistryConfig::new(dir.path());
        let registry = ConfigScanner::new(&config).scan().expect("scan");

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("alpha"));
    }

    #[test]
    fn scan_missing_directory_is_empty() {
        let config = RegistryConfig::new("/nonexistent/wgpeer/dir");
        let registry = ConfigScanner::new(&config).scan().expect("scan");
        assert!(registry.is_empty());
    }
}
