//! Structural editing of the server peer-list document (`wg0.conf`).
//!
//! The document is split into sections that keep their raw text, so a peer can
//! be removed by its address while every untouched byte round-trips exactly.
//! A stanza is matched by the `/32` entry in its `AllowedIPs` line, never by its
//! position relative to other lines.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{RegistryError, Result};

/// Kind of a document section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Lines before the first section header.
    Preamble,
    /// The `[Interface]` section.
    Interface,
    /// A `[Peer]` stanza.
    Peer,
    /// Any other bracketed header.
    Other,
}

/// One section of the document, header included, with its raw lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    kind: SectionKind,
    /// Raw lines, each carrying its own line terminator (if any).
    lines: Vec<String>,
}

impl Section {
    fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
        }
    }

    /// The section kind.
    #[must_use]
    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    /// First value of `key`, trimmed.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values(key).next()
    }

    fn values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        self.lines.iter().filter_map(move |line| {
            let (k, v) = line.trim().split_once('=')?;
            (k.trim() == key).then(|| v.trim())
        })
    }

    /// The stanza's `PublicKey`, if any.
    #[must_use]
    pub fn public_key(&self) -> Option<&str> {
        self.value("PublicKey")
    }

    /// Every entry of every `AllowedIPs` line.
    #[must_use]
    pub fn allowed_ips(&self) -> Vec<&str> {
        self.values("AllowedIPs")
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect()
    }

    fn routes_host(&self, address: &str) -> bool {
        let host = format!("{address}/32");
        self.kind == SectionKind::Peer && self.allowed_ips().iter().any(|ip| *ip == host)
    }
}

/// A parsed server document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDocument {
    sections: Vec<Section>,
}

impl ServerDocument {
    /// Splits a document into sections. Never fails: unknown content is kept verbatim.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut sections = vec![Section::new(SectionKind::Preamble)];

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                let kind = match &trimmed[1..trimmed.len() - 1] {
                    "Interface" => SectionKind::Interface,
                    "Peer" => SectionKind::Peer,
                    _ => SectionKind::Other,
                };
                let mut next = Section::new(kind);
                // Comments and blank lines directly above a header label it.
                if let Some(prev) = sections.last_mut() {
                    let keep = prev
                        .lines
                        .iter()
                        .rposition(|l| !is_label_line(l))
                        .map_or(0, |i| i + 1);
                    next.lines = prev.lines.split_off(keep);
                }
                sections.push(next);
            }
            if let Some(current) = sections.last_mut() {
                current.lines.push(line.to_string());
            }
        }

        Self { sections }
    }

    /// Reassembles the document text.
    #[must_use]
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .flat_map(|s| s.lines.iter())
            .map(String::as_str)
            .collect()
    }

    /// All `[Peer]` stanzas in document order.
    pub fn peers(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.kind == SectionKind::Peer)
    }

    /// Host addresses (mask stripped) of every `/32` route in the document.
    #[must_use]
    pub fn peer_addresses(&self) -> Vec<String> {
        self.peers()
            .flat_map(Section::allowed_ips)
            .filter_map(|ip| ip.strip_suffix("/32"))
            .map(str::to_string)
            .collect()
    }

    /// Returns `true` if a stanza routes `address/32`.
    #[must_use]
    pub fn contains_peer(&self, address: &str) -> bool {
        self.sections.iter().any(|s| s.routes_host(address))
    }

    /// Removes the stanza routing `address/32` and returns it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no stanza matches; the document is left untouched.
    pub fn remove_peer(&mut self, address: &str) -> Result<Section> {
        let index = self
            .sections
            .iter()
            .position(|s| s.routes_host(address))
            .ok_or_else(|| RegistryError::not_found(format!("server stanza for {address}/32")))?;
        Ok(self.sections.remove(index))
    }
}

fn is_label_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Removes the stanza for `address` from document text.
///
/// # Errors
///
/// Returns `NotFound` if no `AllowedIPs` entry equals `address/32`.
pub fn remove_peer_stanza(document: &str, address: &str) -> Result<String> {
    let mut parsed = ServerDocument::parse(document);
    parsed.remove_peer(address)?;
    Ok(parsed.render())
}

/// Removes the stanza for `address` from the document at `path`.
///
/// The new text is written to a sibling temp file and renamed over the
/// original, keeping its permission bits.
///
/// # Errors
///
/// Returns `NotFound` if the stanza is absent, or `Io` on read/write failure.
pub fn remove_peer_stanza_in_file(path: &Path, address: &str) -> Result<()> {
    let document = fs::read_to_string(path).map_err(|e| RegistryError::io(path, e))?;
    let updated = remove_peer_stanza(&document, address)?;

    let tmp = path.with_extension("conf.tmp");
    fs::write(&tmp, updated).map_err(|e| RegistryError::io(&tmp, e))?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(&tmp, meta.permissions()).map_err(|e| RegistryError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| RegistryError::io(path, e))?;

    info!(document = %path.display(), %address, "removed peer stanza");
    Ok(())
}

/// Checks that the document at `path` still routes `address`.
///
/// # Errors
///
/// Returns `Io` if the document cannot be read.
pub fn document_contains_peer(path: &Path, address: &str) -> Result<bool> {
    let document = fs::read_to_string(path).map_err(|e| RegistryError::io(path, e))?;
    let found = ServerDocument::parse(&document).contains_peer(address);
    debug!(document = %path.display(), %address, found, "checked peer stanza");
    Ok(found)
}
