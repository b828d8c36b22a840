//! Error types for peer registry operations.
//!
//! Every failure names the item it concerns so that multi-item operations
//! can report exactly which peer failed and why.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur while managing the peer registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Malformed peer name, octet or manifest.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the violation.
        message: String,
    },

    /// A peer name or octet is already in use.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The peer or server stanza targeted by an operation does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Every address in the allocation range is taken.
    #[error("no free address left in {subnet}.2-254")]
    Exhausted {
        /// The /24 prefix that is full.
        subnet: String,
    },

    /// An external tool exited non-zero, could not be spawned, or timed out.
    #[error("external tool failed: {command}: {message}")]
    ExternalTool {
        /// The command that was executed.
        command: String,
        /// Exit status and stderr, or the reason the tool never ran.
        message: String,
    },

    /// A read or write on a config, key or document file failed.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// File or directory that was being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A multi-step or bulk operation where some units succeeded and some did not.
    #[error("partial failure: {succeeded} succeeded, {failed} failed")]
    PartialFailure {
        /// Units that completed.
        succeeded: usize,
        /// Units that failed.
        failed: usize,
    },

    /// Invalid registry configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Backup document could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another process holds the registry lock.
    #[error("registry locked: {} exists", path.display())]
    Locked {
        /// Path of the lock file.
        path: PathBuf,
    },
}

impl RegistryError {
    /// Creates a `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates an `ExternalTool` error.
    #[must_use]
    pub fn external_tool(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalTool {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates an `Io` error bound to a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for name or octet conflicts.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` when the target of the operation is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when the caller supplied bad input.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::Conflict { .. } | Self::NotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display() {
        let err = RegistryError::conflict("octet 20 already in use");
        assert_eq!(err.to_string(), "conflict: octet 20 already in use");
    }

    #[test]
    fn exhausted_display() {
        let err = RegistryError::Exhausted {
            subnet: "10.10.0".to_string(),
        };
        assert_eq!(err.to_string(), "no free address left in 10.10.0.2-254");
    }

    #[test]
    fn io_display_includes_path() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = RegistryError::io("/etc/wireguard/wg0.conf", source);
        assert_eq!(err.to_string(), "io error on /etc/wireguard/wg0.conf: gone");
    }

    #[test]
    fn external_tool_display() {
        let err = RegistryError::external_tool("scripts/add_cl.sh alice 5", "exit 1: boom");
        assert_eq!(
            err.to_string(),
            "external tool failed: scripts/add_cl.sh alice 5: exit 1: boom"
        );
    }

    #[test]
    fn classification() {
        assert!(RegistryError::conflict("x").is_conflict());
        assert!(RegistryError::not_found("x").is_not_found());
        assert!(RegistryError::validation("x").is_user_error());
        assert!(!RegistryError::external_tool("x", "y").is_user_error());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RegistryError>();
    }
}
