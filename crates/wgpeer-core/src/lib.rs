//! Client peer registry for a single `WireGuard` server.
//!
//! The configuration directory is the database: every client is a
//! `<name>_cl.conf` file whose `Address` line holds its tunnel address, and
//! the server's own document carries one `[Peer]` stanza per client. This
//! crate scans that layout, hands out free addresses in a /24, drives the
//! provisioning tool and cleans every trace of a peer on deletion.
//!
//! # Example
//!
//! ```rust,no_run
//! use wgpeer_core::{PeerManager, RegistryConfig};
//!
//! # async fn example() -> wgpeer_core::Result<()> {
//! let manager = PeerManager::from_config(RegistryConfig::default())?;
//! let peer = manager.add_peer("laptop", None).await?;
//! println!("{} -> {}", peer.name, peer.address);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod backup;
pub mod bulk;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod manager;
pub mod peer;
pub mod scanner;
pub mod server_doc;
pub mod session;
pub mod summary;
pub mod tools;

pub use allocator::IpAllocator;
pub use backup::{BackupSnapshot, RestoreFailure, RestoreOptions, RestoreReport};
pub use bulk::{BulkExecutor, BulkItemResult, BulkReport, ManifestError, ManifestErrors, PlannedCreate};
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use lifecycle::{
    ClientLifecycleManager, DeleteOutcome, DeleteReport, DeleteStep, PeerState, StepOutcome, StepStatus,
};
pub use lock::{RegistryGuard, RegistryLock};
pub use manager::PeerManager;
pub use peer::{sanitize_name, validate_name, PeerConfig, Registry, MAX_NAME_LEN, MAX_OCTET, MIN_OCTET};
pub use scanner::ConfigScanner;
pub use server_doc::ServerDocument;
pub use session::{PendingCreate, SessionStore};
pub use tools::{
    FakeInterfaceControl, FakeProvisioner, InterfaceControl, Provisioner, ScriptProvisioner, WgQuickControl,
};
