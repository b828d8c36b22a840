//! Peer manager tying the registry, allocator and lifecycle together.
//!
//! This module provides the [`PeerManager`] type, the single entry point for
//! front ends. Every mutating method takes the registry lock, rescans the
//! config directory and only then allocates, so concurrent callers never see
//! the same free octet.

use std::time::Duration;

use tracing::{debug, info};

use crate::allocator::IpAllocator;
use crate::backup::{self, BackupSnapshot, RestoreOptions, RestoreReport};
use crate::bulk::{self, BulkExecutor, BulkItemResult, BulkReport, ManifestErrors, PlannedCreate};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::lifecycle::{ClientLifecycleManager, DeleteReport};
use crate::lock::RegistryLock;
use crate::peer::{sanitize_name, PeerConfig, Registry};
use crate::scanner::ConfigScanner;
use crate::session::SessionStore;
use crate::tools::{InterfaceControl, Provisioner, ScriptProvisioner, WgQuickControl};

/// Manages client peers of one `WireGuard` server.
#[derive(Debug)]
pub struct PeerManager<P, C> {
    lifecycle: ClientLifecycleManager<P, C>,
    allocator: IpAllocator,
    lock: RegistryLock,
    bulk: BulkExecutor,
    sessions: SessionStore<i64>,
}

impl PeerManager<ScriptProvisioner, WgQuickControl> {
    /// Creates a manager that runs the provisioning script and `wg-quick`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn from_config(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let provisioner = ScriptProvisioner::new(&config);
        let control = WgQuickControl::new(&config);
        Ok(Self::new(config, provisioner, control))
    }
}

impl<P: Provisioner, C: InterfaceControl> PeerManager<P, C> {
    /// Creates a manager with the given tool implementations.
    #[must_use]
    pub fn new(config: RegistryConfig, provisioner: P, control: C) -> Self {
        let allocator = IpAllocator::new(config.subnet_prefix.clone());
        let lock = RegistryLock::new(&config);
        let bulk = BulkExecutor::new(config.bulk_delay());
        let sessions = SessionStore::new(config.session_ttl());
        Self {
            lifecycle: ClientLifecycleManager::new(config, provisioner, control),
            allocator,
            lock,
            bulk,
            sessions,
        }
    }

    /// Overrides the pause between bulk items.
    #[must_use]
    pub fn with_bulk_delay(mut self, delay: Duration) -> Self {
        self.bulk = BulkExecutor::new(delay);
        self
    }

    /// The registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        self.lifecycle.config()
    }

    /// The address allocator.
    #[must_use]
    pub fn allocator(&self) -> &IpAllocator {
        &self.allocator
    }

    /// Pending two-step creations, keyed by conversation id.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore<i64> {
        &self.sessions
    }

    /// Scans the config directory.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be read.
    pub fn list(&self) -> Result<Registry> {
        ConfigScanner::new(self.config()).scan()
    }

    /// Free octets in ascending order.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be read.
    pub fn available(&self) -> Result<Vec<u8>> {
        Ok(self.allocator.available_octets(&self.list()?))
    }

    /// Creates a peer from free-form input, at `octet` or the lowest free one.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an unusable name, `Conflict` if the name or
    /// octet is taken, `Exhausted` if nothing is free, and `ExternalTool` if
    /// provisioning fails.
    pub async fn add_peer(&self, raw_name: &str, octet: Option<u8>) -> Result<PeerConfig> {
        let name = sanitize_name(raw_name)?;
        if name != raw_name {
            debug!(raw = raw_name, name = %name, "sanitized peer name");
        }

        let guard = self.lock.acquire().await?;
        let registry = self.list()?;
        if registry.contains(&name) {
            return Err(RegistryError::conflict(format!("peer {name} already exists")));
        }
        let octet = self.allocator.allocate(&registry, octet)?;
        info!(peer = %name, octet, "creating peer");
        self.lifecycle.create(&guard, &name, octet).await
    }

    /// Completes a two-step creation started with [`SessionStore::begin`].
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the conversation has no live session, otherwise
    /// whatever [`PeerManager::add_peer`] returns.
    pub async fn finish_pending(&self, conversation: i64) -> Result<PeerConfig> {
        let pending = self
            .sessions
            .take(&conversation)
            .ok_or_else(|| RegistryError::not_found(format!("pending creation for {conversation}")))?;
        self.add_peer(&pending.name, pending.requested_octet).await
    }

    /// Deletes a peer and restarts the interface.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the peer does not exist.
    pub async fn remove_peer(&self, name: &str) -> Result<DeleteReport> {
        let guard = self.lock.acquire().await?;
        self.lifecycle.delete(&guard, name).await
    }

    /// Validates a creation manifest against the current registry.
    ///
    /// # Errors
    ///
    /// The outer error is a scan failure; the inner one lists every manifest
    /// violation.
    pub fn plan_bulk_create(
        &self,
        manifest: &str,
    ) -> Result<std::result::Result<Vec<PlannedCreate>, ManifestErrors>> {
        Ok(bulk::plan_create(manifest, &self.list()?, &self.allocator))
    }

    /// Validates a deletion manifest against the current registry.
    ///
    /// # Errors
    ///
    /// The outer error is a scan failure; the inner one lists every manifest
    /// violation.
    pub fn plan_bulk_delete(
        &self,
        manifest: &str,
    ) -> Result<std::result::Result<Vec<PeerConfig>, ManifestErrors>> {
        Ok(bulk::plan_delete(manifest, &self.list()?))
    }

    /// Validates and runs a creation manifest.
    ///
    /// The manifest is validated again under the lock, so a plan shown to a
    /// user earlier cannot race with another writer.
    ///
    /// # Errors
    ///
    /// Returns `Validation` listing every violation, in which case nothing ran.
    /// Item failures are reported in the [`BulkReport`].
    pub async fn bulk_create<F>(&self, manifest: &str, progress: F) -> Result<BulkReport>
    where
        F: FnMut(usize, usize, &BulkItemResult),
    {
        let guard = self.lock.acquire().await?;
        let plan = bulk::plan_create(manifest, &self.list()?, &self.allocator)?;
        info!(items = plan.len(), "starting bulk create");
        Ok(self.bulk.create(&self.lifecycle, &guard, &plan, progress).await)
    }

    /// Validates and runs a deletion manifest.
    ///
    /// # Errors
    ///
    /// Returns `Validation` listing every violation, in which case nothing ran.
    pub async fn bulk_delete<F>(&self, manifest: &str, progress: F) -> Result<BulkReport>
    where
        F: FnMut(usize, usize, &BulkItemResult),
    {
        let guard = self.lock.acquire().await?;
        let plan = bulk::plan_delete(manifest, &self.list()?)?;
        info!(items = plan.len(), "starting bulk delete");
        Ok(self.bulk.delete(&self.lifecycle, &guard, &plan, progress).await)
    }

    /// Captures a backup snapshot.
    ///
    /// The lock is held so the snapshot never sees a half-created peer.
    ///
    /// # Errors
    ///
    /// Returns `Io` if a file cannot be read.
    pub async fn backup(&self) -> Result<BackupSnapshot> {
        let _guard = self.lock.acquire().await?;
        backup::snapshot(self.config())
    }

    /// Replaces the live state with `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the snapshot names an unusable client.
    pub async fn restore(
        &self,
        snapshot: &BackupSnapshot,
        options: &RestoreOptions,
    ) -> Result<RestoreReport> {
        let guard = self.lock.acquire().await?;
        backup::restore(self.config(), self.lifecycle.control(), &guard, snapshot, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::DeleteOutcome;
    use crate::server_doc::document_contains_peer;
    use crate::tools::{FakeInterfaceControl, FakeProvisioner};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        manager: PeerManager<FakeProvisioner, FakeInterfaceControl>,
        provisioner: FakeProvisioner,
        control: FakeInterfaceControl,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let config = RegistryConfig::new(dir.path().join("wg"))
            .with_summary_file(dir.path().join("cofigs.txt"))
            .with_variables_file(dir.path().join("variables.sh"))
            .with_backup_dir(dir.path().join("backups"))
            .with_bulk_delay(Duration::ZERO);
        fs::create_dir_all(&config.config_dir).expect("dir");
        fs::write(config.server_document(), "[Interface]\nAddress = 10.10.0.1/24\n").expect("doc");

        let provisioner = FakeProvisioner::new(&config);
        let control = FakeInterfaceControl::new();
        let manager = PeerManager::new(config, provisioner.clone(), control.clone());
        Fixture {
            _dir: dir,
            manager,
            provisioner,
            control,
        }
    }

    #[tokio::test]
    async fn add_assigns_lowest_free_octet() {
        let f = fixture();
        let alice = f.manager.add_peer("alice", None).await.expect("alice");
        let bob = f.manager.add_peer("bob", Some(9)).await.expect("bob");
        let carol = f.manager.add_peer("carol", None).await.expect("carol");

        assert_eq!(alice.octet, 2);
        assert_eq!(bob.octet, 9);
        assert_eq!(carol.octet, 3);
        assert_eq!(f.manager.list().expect("scan").len(), 3);
        assert!(!f.manager.available().expect("available").contains(&9));
    }

    #[tokio::test]
    async fn add_sanitizes_names() {
        let f = fixture();
        let peer = f.manager.add_peer("  Alice's Phone ", None).await.expect("added");
        assert_eq!(peer.name, "alice_s_phone");
        assert_eq!(f.provisioner.calls(), vec![("alice_s_phone".to_string(), 2)]);
    }

    #[tokio::test]
    async fn add_rejects_taken_name_and_octet() {
        let f = fixture();
        f.manager.add_peer("alice", Some(10)).await.expect("alice");

        let err = f.manager.add_peer("alice", None).await.expect_err("name taken");
        assert!(err.is_conflict());
        let err = f.manager.add_peer("bob", Some(10)).await.expect_err("octet taken");
        assert!(err.is_conflict());
        assert_eq!(f.provisioner.calls().len(), 1, "tool not invoked on conflict");
    }

    #[tokio::test]
    async fn removed_octet_becomes_available() {
        let f = fixture();
        f.manager.add_peer("alice", None).await.expect("alice");
        f.manager.add_peer("bob", None).await.expect("bob");

        let report = f.manager.remove_peer("alice").await.expect("removed");
        assert_eq!(report.outcome(), DeleteOutcome::FullSuccess);
        assert!(!document_contains_peer(&f.manager.config().server_document(), "10.10.0.2").expect("doc"));
        assert_eq!(f.control.events(), vec!["down", "up"]);

        let again = f.manager.add_peer("carol", None).await.expect("carol");
        assert_eq!(again.octet, 2);
    }

    #[tokio::test]
    async fn remove_unknown_peer_is_not_found() {
        let f = fixture();
        let err = f.manager.remove_peer("ghost").await.expect_err("missing");
        assert!(err.is_not_found());
        assert!(f.control.events().is_empty());
    }

    #[tokio::test]
    async fn concurrent_adds_get_distinct_octets() {
        let f = fixture();
        let m = &f.manager;

        let (a, b, c, d) = tokio::join!(
            m.add_peer("alpha", None),
            m.add_peer("beta", None),
            m.add_peer("gamma", None),
            m.add_peer("delta", None),
        );
        let mut octets: Vec<u8> = [a, b, c, d]
            .into_iter()
            .map(|r| r.expect("add").octet)
            .collect();
        octets.sort_unstable();
        assert_eq!(octets, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn invalid_manifest_executes_nothing() {
        let f = fixture();
        f.manager.add_peer("alice", Some(20)).await.expect("alice");

        let err = f
            .manager
            .bulk_create("carol\ndave:20\nalice\n", |_, _, _| {})
            .await
            .expect_err("invalid");
        assert!(matches!(err, RegistryError::Validation { .. }));
        assert_eq!(f.provisioner.calls().len(), 1);

        let plan = f.manager.plan_bulk_create("carol\ndave:20\nalice\n").expect("scan");
        let errors = plan.expect_err("violations");
        assert_eq!(errors.messages(), vec!["octet 20 already in use", "alice already exists"]);
    }

    #[tokio::test]
    async fn bulk_round_trip() {
        let f = fixture();
        let report = f
            .manager
            .bulk_create("alice\nbob:40\ncarol\n", |_, _, _| {})
            .await
            .expect("planned");
        assert_eq!(report.succeeded, 3);

        let names: Vec<String> = f.manager.list().expect("scan").names().map(str::to_string).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);

        let report = f.manager.bulk_delete("all\n", |_, _, _| {}).await.expect("planned");
        assert_eq!(report.succeeded, 3);
        assert!(f.manager.list().expect("scan").is_empty());
        assert_eq!(f.control.events(), vec!["down", "up"]);
    }

    #[tokio::test]
    async fn pending_session_completes_creation() {
        let f = fixture();
        f.manager.sessions().begin(7, "alice");
        assert!(f.manager.sessions().set_octet(&7, 42));

        let peer = f.manager.finish_pending(7).await.expect("created");
        assert_eq!(peer.octet, 42);
        assert!(f.manager.finish_pending(7).await.expect_err("consumed").is_not_found());
    }

    #[tokio::test]
    async fn backup_then_restore() {
        let f = fixture();
        f.manager.add_peer("alice", None).await.expect("alice");
        f.manager.add_peer("bob", Some(30)).await.expect("bob");
        let snapshot = f.manager.backup().await.expect("backup");

        f.manager.remove_peer("bob").await.expect("removed");
        f.manager.add_peer("mallory", None).await.expect("mallory");

        let report = f
            .manager
            .restore(&snapshot, &RestoreOptions::default())
            .await
            .expect("restore");
        assert!(report.is_complete(), "{report:?}");

        let registry = f.manager.list().expect("scan");
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(registry.get("bob").expect("bob").octet, 30);
    }
}
