//! Serialization of registry mutations.
//!
//! Allocation reads the directory and creation writes it, so two writers that
//! scan at the same time would hand out the same octet. Every mutating entry
//! point holds a [`RegistryGuard`]: an in-process mutex plus an exclusive lock
//! file in the config directory that keeps separate processes apart.
//!
//! The lock file records the holder's PID. A holder that died without
//! dropping its guard leaves the file behind; the next writer finds the PID
//! gone and takes the lock over.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// The single critical section guarding the config directory.
#[derive(Debug, Clone)]
pub struct RegistryLock {
    inner: Arc<Mutex<()>>,
    config_dir: PathBuf,
    lock_file: PathBuf,
    timeout: Duration,
}

impl RegistryLock {
    /// Creates a lock for the configured directory.
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            config_dir: config.config_dir.clone(),
            lock_file: config.lock_file(),
            timeout: config.lock_timeout(),
        }
    }

    /// Waits for the in-process mutex, then for the lock file.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process keeps the lock file past the
    /// timeout, or `Io` if the file cannot be created.
    pub async fn acquire(&self) -> Result<RegistryGuard<'_>> {
        let guard = self.inner.lock().await;
        fs::create_dir_all(&self.config_dir).map_err(|e| RegistryError::io(&self.config_dir, e))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_file)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!(lock = %self.lock_file.display(), "acquired registry lock");
                    return Ok(RegistryGuard {
                        _guard: guard,
                        lock_file: self.lock_file.clone(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.reclaim_stale() {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(RegistryError::Locked {
                            path: self.lock_file.clone(),
                        });
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => return Err(RegistryError::io(&self.lock_file, e)),
            }
        }
    }

    /// Removes the lock file if its recorded holder is no longer running.
    /// An unreadable or empty file counts as held: its owner may still be
    /// writing the PID.
    fn reclaim_stale(&self) -> bool {
        let Some(pid) = read_holder(&self.lock_file) else {
            return false;
        };
        if process_alive(pid) || read_holder(&self.lock_file) != Some(pid) {
            return false;
        }

        match fs::remove_file(&self.lock_file) {
            Ok(()) => {
                warn!(lock = %self.lock_file.display(), pid, "reclaimed registry lock from dead process");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!(lock = %self.lock_file.display(), pid, error = %e, "cannot remove stale registry lock");
                false
            }
        }
    }
}

fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Proof that the registry lock is held. Released on drop.
#[derive(Debug)]
pub struct RegistryGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    lock_file: PathBuf,
}

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_file) {
            warn!(lock = %self.lock_file.display(), error = %e, "failed to remove registry lock file");
        }
    }
}
