//! Artifact sanitization.
//!
//! A downloaded artifact must look like a program before it may replace the
//! live one:
//! - it must still fit under the size ceiling;
//! - it must contain the `__version__` marker and a top-level entry guard
//!   (`if __name__ == '__main__':`), found by a line-by-line scan;
//! - the version it declares must equal the version the caller asked for.
//!
//! The textual scan is a cheap filter for wrong URLs, HTML error pages and
//! truncated files. The declared version is then read through a
//! [`VersionProbe`]. The default probe parses the declaration as text and
//! never executes the artifact.

use std::io::{BufRead, Read};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::UpdateConfig;
use crate::download::TempArtifact;
use crate::error::UpdateError;
use crate::store::ProgramStore;
use crate::version::Version;

/// Substring that marks the version declaration.
pub const VERSION_MARKER: &str = "__version__";

/// Accepted spellings of the entry guard, after whitespace is collapsed.
pub const ENTRY_GUARDS: [&str; 2] = [
    "if __name__ == '__main__':",
    "if __name__ == \"__main__\":",
];

/// Checks a temp artifact before installation.
pub trait Validator: Send + Sync {
    fn validate(&self, artifact: &TempArtifact, expected: &Version) -> Result<(), UpdateError>;
}

/// Reads the declared version out of a program without touching device state.
pub trait VersionProbe: Send + Sync {
    fn declared_version(&self, program: &str) -> Result<String, UpdateError>;
}

/// Markers found by the structural scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Markers {
    pub version_marker: bool,
    pub entry_guard: bool,
}

impl Markers {
    /// Fail on the first missing marker, guard first.
    pub fn require_all(&self) -> Result<(), UpdateError> {
        if !self.entry_guard {
            return Err(UpdateError::MissingEntryGuard);
        }
        if !self.version_marker {
            return Err(UpdateError::MissingVersionMarker);
        }
        Ok(())
    }
}

/// Whether a single line is a top-level entry guard.
pub fn is_entry_guard(line: &str) -> bool {
    let stripped = line.trim_end();
    match stripped.chars().next() {
        Some(c) if !c.is_whitespace() => {}
        _ => return false,
    }
    let condensed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    ENTRY_GUARDS.contains(&condensed.as_str())
}

/// Scan a program line by line for the version marker and entry guard.
pub fn scan_markers<R: BufRead + ?Sized>(reader: &mut R) -> Result<Markers, UpdateError> {
    let mut markers = Markers::default();
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                UpdateError::MalformedArtifact("artifact is not valid UTF-8 text".to_string())
            } else {
                UpdateError::Storage(e)
            }
        })?;
        if n == 0 {
            break;
        }

        if !markers.version_marker && line.contains(VERSION_MARKER) {
            debug!("Found version marker");
            markers.version_marker = true;
        }
        if !markers.entry_guard && is_entry_guard(&line) {
            debug!("Found entry guard");
            markers.entry_guard = true;
        }
    }

    Ok(markers)
}

/// Reads `__version__` from top-level literal assignments.
///
/// Only statements of the form `__version__ = "x"` or `__version__ = 'x'`
/// at column zero count, optionally followed by a `#` comment. When several
/// are present the last one wins. Anything that would need evaluation is
/// rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralVersionProbe;

impl VersionProbe for LiteralVersionProbe {
    fn declared_version(&self, program: &str) -> Result<String, UpdateError> {
        let mut declared = None;

        for (idx, line) in program.lines().enumerate() {
            let Some(rhs) = top_level_version_assignment(line) else {
                continue;
            };
            let value = parse_string_literal(rhs).map_err(|reason| {
                UpdateError::MalformedArtifact(format!("line {}: {}", idx + 1, reason))
            })?;
            declared = Some(value);
        }

        declared.ok_or_else(|| {
            UpdateError::MalformedArtifact(format!(
                "'{}' is never assigned at top level",
                VERSION_MARKER
            ))
        })
    }
}

/// Right-hand side of a top-level `__version__ = ...` statement.
fn top_level_version_assignment(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(VERSION_MARKER)?;
    if rest.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
        // a longer identifier such as `__version__info`
        return None;
    }
    let rest = rest.trim_start();
    let rhs = rest.strip_prefix('=')?;
    if rhs.starts_with('=') {
        return None;
    }
    Some(rhs.trim())
}

fn parse_string_literal(rhs: &str) -> Result<String, String> {
    let quote = match rhs.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(format!("'{}' must be a plain string literal", VERSION_MARKER)),
    };
    let body = &rhs[1..];
    let end = body
        .find(quote)
        .ok_or_else(|| "unterminated string literal".to_string())?;
    let value = &body[..end];
    if value.contains('\\') {
        return Err("escape sequences are not supported in the version literal".to_string());
    }

    let trailing = body[end + 1..].trim();
    if !trailing.is_empty() && !trailing.starts_with('#') {
        return Err(format!(
            "unexpected text after the version literal: {:?}",
            trailing
        ));
    }
    Ok(value.to_string())
}

/// Read the declared version of any store entry, typically the live program.
pub fn read_declared_version(
    store: &dyn ProgramStore,
    name: &str,
    max_size: u64,
    probe: &dyn VersionProbe,
) -> Result<String, UpdateError> {
    let text = read_bounded_text(store, name, max_size)?;
    probe.declared_version(&text)
}

fn read_bounded_text(store: &dyn ProgramStore, name: &str, max_size: u64) -> Result<String, UpdateError> {
    let mut text = String::new();
    store
        .open(name)?
        .take(max_size.saturating_add(1))
        .read_to_string(&mut text)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                UpdateError::MalformedArtifact("artifact is not valid UTF-8 text".to_string())
            } else {
                UpdateError::Storage(e)
            }
        })?;
    if text.len() as u64 > max_size {
        return Err(UpdateError::Oversize {
            limit: max_size,
            actual: text.len() as u64,
        });
    }
    Ok(text)
}

/// Size, structure and declared-version checks over the program store.
pub struct ArtifactValidator {
    store: Arc<dyn ProgramStore>,
    max_size: u64,
    probe: Box<dyn VersionProbe>,
}

impl ArtifactValidator {
    /// Create a validator that reads declarations with [`LiteralVersionProbe`].
    pub fn new(store: Arc<dyn ProgramStore>, config: &UpdateConfig) -> Self {
        Self::with_probe(store, config, Box::new(LiteralVersionProbe))
    }

    /// Create a validator with a custom version probe.
    pub fn with_probe(
        store: Arc<dyn ProgramStore>,
        config: &UpdateConfig,
        probe: Box<dyn VersionProbe>,
    ) -> Self {
        Self {
            store,
            max_size: config.max_size,
            probe,
        }
    }

    fn check_size(&self, artifact: &TempArtifact) -> Result<(), UpdateError> {
        let size = self.store.size(artifact.name())?.ok_or_else(|| {
            UpdateError::Storage(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", artifact.name()),
            ))
        })?;
        if size > self.max_size {
            error!(
                size,
                limit = self.max_size,
                name = artifact.name(),
                "Artifact exceeds size limit"
            );
            return Err(UpdateError::Oversize {
                limit: self.max_size,
                actual: size,
            });
        }
        Ok(())
    }
}

impl Validator for ArtifactValidator {
    fn validate(&self, artifact: &TempArtifact, expected: &Version) -> Result<(), UpdateError> {
        self.check_size(artifact)?;

        let markers = scan_markers(&mut *self.store.open(artifact.name())?)?;
        debug!(
            version_marker = markers.version_marker,
            entry_guard = markers.entry_guard,
            "Structural scan complete"
        );
        markers.require_all()?;

        let program = read_bounded_text(self.store.as_ref(), artifact.name(), self.max_size)?;
        let declared = self.probe.declared_version(&program)?;
        if declared != expected.as_str() {
            error!(
                expected = %expected,
                declared = %declared,
                "Artifact declares the wrong version"
            );
            return Err(UpdateError::VersionMismatch {
                expected: expected.to_string(),
                found: declared,
            });
        }

        info!(name = artifact.name(), version = %expected, "Artifact validated");
        Ok(())
    }
}
