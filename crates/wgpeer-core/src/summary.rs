//! The plain-text summary of issued addresses (`cofigs.txt`).
//!
//! Lines are free-form, typically `<address> <name>`. An entry belongs to a
//! peer when its first token is the peer's address or any token is its name.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;

use crate::error::{RegistryError, Result};

/// Drops every line that refers to `address` or `name`. Returns the new text
/// and how many lines were dropped.
#[must_use]
pub fn remove_entries(text: &str, address: &str, name: &str) -> (String, usize) {
    let mut removed = 0;
    let kept: String = text
        .split_inclusive('\n')
        .filter(|line| {
            let mut tokens = line.split_whitespace();
            let matches = tokens
                .next()
                .is_some_and(|first| first == address || first == name)
                || tokens.any(|t| t == name);
            if matches {
                removed += 1;
            }
            !matches
        })
        .collect();
    (kept, removed)
}

/// Removes a peer's lines from the summary file.
///
/// Returns `None` when the file does not exist.
///
/// # Errors
///
/// Returns `Io` if the file exists but cannot be read or written.
pub fn remove_from_file(path: &Path, address: &str, name: &str) -> Result<Option<usize>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RegistryError::io(path, e)),
    };

    let (updated, removed) = remove_entries(&text, address, name);
    if removed > 0 {
        fs::write(path, updated).map_err(|e| RegistryError::io(path, e))?;
    }
    debug!(summary = %path.display(), peer = %name, removed, "updated summary file");
    Ok(Some(removed))
}
