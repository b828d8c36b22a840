//! Peer and registry types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Lowest assignable final octet (`.1` belongs to the server).
pub const MIN_OCTET: u8 = 2;
/// Highest assignable final octet.
pub const MAX_OCTET: u8 = 254;
/// Maximum length of a peer name.
pub const MAX_NAME_LEN: usize = 32;

/// One VPN client as found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Unique peer name.
    pub name: String,
    /// Dotted-quad address without mask.
    pub address: String,
    /// Final address component.
    pub octet: u8,
    /// The generated client config.
    pub config_file: PathBuf,
    /// Client private key, when present.
    pub private_key_file: Option<PathBuf>,
    /// Client public key, when present.
    pub public_key_file: Option<PathBuf>,
}

/// Snapshot of every peer, keyed by name.
///
/// Always derived from a fresh scan; holding on to one across a mutation
/// gives a stale view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Registry {
    peers: BTreeMap<String, PeerConfig>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a peer. Rejects duplicate names and octets.
    ///
    /// # Errors
    ///
    /// Returns a `Conflict` error if the name or octet is already present.
    pub fn insert(&mut self, peer: PeerConfig) -> Result<()> {
        if self.peers.contains_key(&peer.name) {
            return Err(RegistryError::conflict(format!(
                "{} already exists",
                peer.name
            )));
        }
        if let Some(owner) = self.by_octet(peer.octet) {
            return Err(RegistryError::conflict(format!(
                "octet {} already used by {}",
                peer.octet, owner.name
            )));
        }
        self.peers.insert(peer.name.clone(), peer);
        Ok(())
    }

    /// Looks up a peer by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PeerConfig> {
        self.peers.get(name)
    }

    /// Looks up a peer by octet.
    #[must_use]
    pub fn by_octet(&self, octet: u8) -> Option<&PeerConfig> {
        self.peers.values().find(|p| p.octet == octet)
    }

    /// Returns `true` if a peer with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    /// Returns `true` if the octet is taken.
    #[must_use]
    pub fn is_octet_used(&self, octet: u8) -> bool {
        self.by_octet(octet).is_some()
    }

    /// Octets in use, ascending.
    #[must_use]
    pub fn used_octets(&self) -> Vec<u8> {
        let mut octets: Vec<u8> = self.peers.values().map(|p| p.octet).collect();
        octets.sort_unstable();
        octets
    }

    /// Peer names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    /// Peers in name order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerConfig> {
        self.peers.values()
    }

    /// Number of peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if there are no peers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Rewrites free-form input into a usable peer name.
///
/// Characters outside `[A-Za-z0-9_]` become `_`, the result is lowercased and
/// leading/trailing underscores are trimmed.
///
/// # Errors
///
/// Returns a `Validation` error if nothing usable remains or the result is too long.
pub fn sanitize_name(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    validate_name(&cleaned)?;
    Ok(cleaned)
}

/// Checks a peer name without rewriting it.
///
/// # Errors
///
/// Returns a `Validation` error for empty names, names over
/// [`MAX_NAME_LEN`] characters, or characters outside `[A-Za-z0-9_-]`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RegistryError::validation("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RegistryError::validation(format!(
            "name '{name}' is longer than {MAX_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(RegistryError::validation(format!(
            "name '{name}' contains illegal character '{bad}'"
        )));
    }
    Ok(())
}

/// Returns `true` if the octet lies in the assignable range.
#[must_use]
pub fn octet_in_range(octet: u8) -> bool {
    (MIN_OCTET..=MAX_OCTET).contains(&octet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn peer(name: &str, octet: u8) -> PeerConfig {
        PeerConfig {
            name: name.to_string(),
            address: format!("10.10.0.{octet}"),
            octet,
            config_file: PathBuf::from(format!("/etc/wireguard/{name}_cl.conf")),
            private_key_file: None,
            public_key_file: None,
        }
    }

    #[test]
    fn registry_rejects_duplicate_name() {
        let mut registry = Registry::new();
        registry.insert(peer("alice", 10)).expect("insert");
        let err = registry.insert(peer("alice", 11)).expect_err("duplicate");
        assert!(err.is_conflict());
    }

    #[test]
    fn registry_rejects_duplicate_octet() {
        let mut registry = Registry::new();
        registry.insert(peer("alice", 10)).expect("insert");
        let err = registry.insert(peer("bob", 10)).expect_err("duplicate");
        assert!(err.to_string().contains("alice"));
    }

    #[test]
    fn used_octets_sorted() {
        let mut registry = Registry::new();
        registry.insert(peer("zed", 9)).expect("insert");
        registry.insert(peer("amy", 2)).expect("insert");
        registry.insert(peer("kim", 5)).expect("insert");
        assert_eq!(registry.used_octets(), vec![2, 5, 9]);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["amy", "kim", "zed"]);
    }

    #[test_case("Alice Phone", "alice_phone" ; "spaces")]
    #[test_case("__bob__", "bob" ; "trimmed underscores")]
    #[test_case("Ivan-PC!", "ivan_pc" ; "punctuation")]
    #[test_case("laptop42", "laptop42" ; "already clean")]
    fn sanitize(raw: &str, expected: &str) {
        assert_eq!(sanitize_name(raw).expect("sanitized"), expected);
    }

    #[test]
    fn sanitize_rejects_empty_result() {
        assert!(sanitize_name("!!!").is_err());
        assert!(sanitize_name("").is_err());
    }

    #[test_case("alice", true ; "plain")]
    #[test_case("my-phone_2", true ; "dash and underscore")]
    #[test_case("bad name", false ; "space")]
    #[test_case("../etc", false ; "path traversal")]
    #[test_case("", false ; "empty")]
    fn name_validation(name: &str, ok: bool) {
        assert_eq!(validate_name(name).is_ok(), ok);
    }

    #[test]
    fn name_length_cap() {
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(validate_name(&long).is_err());
        assert!(validate_name(&long[..MAX_NAME_LEN]).is_ok());
    }

    #[test]
    fn octet_range() {
        assert!(!octet_in_range(0));
        assert!(!octet_in_range(1));
        assert!(octet_in_range(2));
        assert!(octet_in_range(254));
        assert!(!octet_in_range(255));
    }
}
