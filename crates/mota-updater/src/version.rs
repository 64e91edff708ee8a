//! Dotted version strings.
//!
//! Versions are sequences of non-negative integers separated by dots. Missing
//! trailing components count as zero, so `1.2` and `1.2.0` are the same
//! release. Strings that do not parse as numbers are still comparable: they
//! fall back to plain lexical ordering of the raw text.

use std::cmp::Ordering;
use std::fmt;

use tracing::warn;

/// An immutable parsed version.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    /// `None` when at least one component is not a non-negative integer.
    components: Option<Vec<u64>>,
}

impl Version {
    /// Parse a version string. Never fails; unparsable input yields a
    /// version that compares lexically.
    pub fn parse(s: &str) -> Self {
        let components = if s.is_empty() {
            None
        } else {
            s.split('.')
                .map(|part| part.parse::<u64>().ok())
                .collect::<Option<Vec<_>>>()
        };

        Self {
            raw: s.to_string(),
            components,
        }
    }

    /// The original string form.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Whether every component parsed as an integer.
    pub fn is_numeric(&self) -> bool {
        self.components.is_some()
    }

    /// Numeric components, if the version parsed.
    pub fn components(&self) -> Option<&[u64]> {
        self.components.as_deref()
    }

    /// Compare two versions.
    ///
    /// Numeric versions compare component-wise after zero padding. If either
    /// side is not numeric, the raw strings are compared lexically.
    pub fn compare(&self, other: &Version) -> Ordering {
        match (&self.components, &other.components) {
            (Some(a), Some(b)) => compare_padded(a, b),
            _ => self.raw.cmp(&other.raw),
        }
    }

    /// Whether `self` is a strictly newer release than `current`.
    pub fn is_newer_than(&self, current: &Version) -> bool {
        if self.is_empty() || current.is_empty() {
            return false;
        }
        if !self.is_numeric() || !current.is_numeric() {
            warn!(
                current = %current,
                candidate = %self,
                "Could not parse version strings, falling back to lexical comparison"
            );
        }
        self.compare(current) == Ordering::Greater
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

fn compare_padded(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            decided => return decided,
        }
    }
    Ordering::Equal
}

/// Returns true if `candidate` is a newer version than `current`.
///
/// An empty string on either side is never newer.
pub fn is_newer(current: &str, candidate: &str) -> bool {
    Version::parse(candidate).is_newer_than(&Version::parse(current))
}
