//! Address allocation over a registry snapshot.
//!
//! Free addresses are always computed from a fresh scan. No "next free"
//! counter is stored anywhere, so manual edits and failed creations can never
//! make the allocator drift from what is on disk.

use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::peer::{octet_in_range, Registry, MAX_OCTET, MIN_OCTET};

/// Allocates final octets inside one /24.
#[derive(Debug, Clone)]
pub struct IpAllocator {
    subnet_prefix: String,
}

impl IpAllocator {
    /// Creates an allocator for addresses `<subnet_prefix>.2` to `<subnet_prefix>.254`.
    #[must_use]
    pub fn new(subnet_prefix: impl Into<String>) -> Self {
        Self {
            subnet_prefix: subnet_prefix.into(),
        }
    }

    /// Octets not used by any peer, ascending.
    #[must_use]
    pub fn available_octets(&self, registry: &Registry) -> Vec<u8> {
        (MIN_OCTET..=MAX_OCTET)
            .filter(|octet| !registry.is_octet_used(*octet))
            .collect()
    }

    /// Picks an octet.
    ///
    /// An explicit request is returned unchanged when it is free. Without one
    /// the lowest free octet is chosen.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the requested octet is out of range or taken, and
    /// `Exhausted` if no octet is free.
    pub fn allocate(&self, registry: &Registry, requested: Option<u8>) -> Result<u8> {
        self.allocate_excluding(registry, requested, &[])
    }

    /// Like [`allocate`](Self::allocate) but also treats `reserved` as taken.
    ///
    /// Bulk creation uses this to keep auto-addressed items clear of octets
    /// claimed earlier in the same manifest.
    ///
    /// # Errors
    ///
    /// Same as [`allocate`](Self::allocate).
    pub fn allocate_excluding(
        &self,
        registry: &Registry,
        requested: Option<u8>,
        reserved: &[u8],
    ) -> Result<u8> {
        if let Some(octet) = requested {
            if !octet_in_range(octet) {
                return Err(RegistryError::conflict(format!(
                    "octet {octet} is outside {MIN_OCTET}-{MAX_OCTET}"
                )));
            }
            if let Some(owner) = registry.by_octet(octet) {
                return Err(RegistryError::conflict(format!(
                    "octet {octet} already in use by {}",
                    owner.name
                )));
            }
            if reserved.contains(&octet) {
                return Err(RegistryError::conflict(format!(
                    "octet {octet} already reserved"
                )));
            }
            return Ok(octet);
        }

        let octet = self
            .available_octets(registry)
            .into_iter()
            .find(|octet| !reserved.contains(octet))
            .ok_or_else(|| RegistryError::Exhausted {
                subnet: self.subnet_prefix.clone(),
            })?;

        debug!(octet, "allocated lowest free octet");
        Ok(octet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerConfig;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn registry_with(octets: &[u8]) -> Registry {
        let mut registry = Registry::new();
        for octet in octets {
            registry
                .insert(PeerConfig {
                    name: format!("peer{octet}"),
                    address: format!("10.10.0.{octet}"),
                    octet: *octet,
                    config_file: PathBuf::from(format!("peer{octet}_cl.conf")),
                    private_key_file: None,
                    public_key_file: None,
                })
                .expect("insert");
        }
        registry
    }

    fn allocator() -> IpAllocator {
        IpAllocator::new("10.10.0")
    }

    #[test]
    fn available_skips_used() {
        let registry = registry_with(&[2, 5, 9]);
        let available = allocator().available_octets(&registry);

        assert_eq!(&available[..6], &[3, 4, 6, 7, 8, 10]);
        assert_eq!(available.last(), Some(&254));
        assert_eq!(available.len(), 253 - 3);
        assert_eq!(allocator().allocate(&registry, None).expect("auto"), 3);
    }

    #[test]
    fn empty_registry_starts_at_two() {
        let registry = Registry::new();
        assert_eq!(allocator().allocate(&registry, None).expect("auto"), 2);
    }

    #[test]
    fn explicit_request_returned_unchanged() {
        let registry = registry_with(&[2]);
        assert_eq!(allocator().allocate(&registry, Some(200)).expect("explicit"), 200);
    }

    #[test]
    fn explicit_request_conflicts() {
        let registry = registry_with(&[20]);
        let err = allocator().allocate(&registry, Some(20)).expect_err("used");
        assert!(err.is_conflict());
        assert!(err.to_string().contains("peer20"));

        for bad in [0, 1, 255] {
            let err = allocator().allocate(&registry, Some(bad)).expect_err("range");
            assert!(err.is_conflict());
        }
    }

    #[test]
    fn exhausted_when_full() {
        let all: Vec<u8> = (MIN_OCTET..=MAX_OCTET).collect();
        let registry = registry_with(&all);
        assert!(allocator().available_octets(&registry).is_empty());
        let err = allocator().allocate(&registry, None).expect_err("full");
        assert!(matches!(err, RegistryError::Exhausted { .. }));
    }

    #[test]
    fn reserved_octets_are_skipped() {
        let registry = registry_with(&[2]);
        let octet = allocator()
            .allocate_excluding(&registry, None, &[3, 4])
            .expect("auto");
        assert_eq!(octet, 5);
        assert!(allocator()
            .allocate_excluding(&registry, Some(3), &[3])
            .is_err());
    }

    proptest! {
        #[test]
        fn auto_is_minimum_available(used in proptest::collection::btree_set(2u8..=254, 0..60)) {
            let used: Vec<u8> = used.into_iter().collect();
            let registry = registry_with(&used);
            let available = allocator().available_octets(&registry);
            let octet = allocator().allocate(&registry, None).expect("not full");
            prop_assert_eq!(Some(&octet), available.first());
            prop_assert!(!used.contains(&octet));
        }

        #[test]
        fn free_request_always_succeeds(
            used in proptest::collection::btree_set(2u8..=254, 0..60),
            wanted in 2u8..=254,
        ) {
            let used: Vec<u8> = used.into_iter().collect();
            let registry = registry_with(&used);
            let result = allocator().allocate(&registry, Some(wanted));
            prop_assert_eq!(result.is_ok(), !used.contains(&wanted));
        }
    }
}
