//! Error types for the update engine.

use thiserror::Error;

/// Errors that can occur during an update run.
///
/// Every variant is terminal for the run that produced it; the engine never
/// retries internally.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The source could not be fetched (bad status, connection or read error)
    #[error("transport error: {0}")]
    Transport(String),

    /// The artifact grew past the configured byte ceiling
    #[error("artifact exceeds size limit: {actual} bytes > {limit} bytes")]
    Oversize { limit: u64, actual: u64 },

    /// No top-level entry-point guard was found in the artifact
    #[error("artifact is missing the top-level '__main__' entry guard")]
    MissingEntryGuard,

    /// No `__version__` marker was found in the artifact
    #[error("artifact is missing the '__version__' marker")]
    MissingVersionMarker,

    /// The artifact declares a different version than the one requested
    #[error("version mismatch: expected {expected}, artifact declares {found}")]
    VersionMismatch { expected: String, found: String },

    /// The artifact could not be read as a program
    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),

    /// Promoting the artifact to the live slot failed
    #[error("installation failed: {0}")]
    Install(String),

    /// Persistent store error
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl UpdateError {
    /// Whether invoking the update again, unchanged, may succeed.
    ///
    /// Artifact-content errors will repeat until the published artifact
    /// changes, so only transport and storage failures qualify.
    pub fn is_recoverable_by_retry(&self) -> bool {
        matches!(self, UpdateError::Transport(_) | UpdateError::Storage(_))
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        UpdateError::Transport(err.to_string())
    }
}
