//! CLI error types.

use thiserror::Error;
use wgpeer_core::RegistryError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A manifest was rejected; the violations were already printed.
    #[error("manifest rejected with {count} error(s), nothing was executed")]
    Manifest {
        /// Number of violations.
        count: usize,
    },

    /// The operation ran but not every part of it succeeded.
    #[error("incomplete: {0}")]
    Incomplete(String),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_error_display_manifest() {
        let err = CliError::Manifest { count: 2 };
        assert_eq!(err.to_string(), "manifest rejected with 2 error(s), nothing was executed");
    }

    #[test]
    fn cli_error_registry_is_transparent() {
        let err = CliError::from(RegistryError::not_found("peer ghost"));
        assert_eq!(err.to_string(), "not found: peer ghost");
    }

    #[test]
    fn cli_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let cli_err = CliError::from(io_err);
        assert!(matches!(cli_err, CliError::Io(_)));
    }
}
