//! # mota-updater
//!
//! Over-the-air self-update engine for a device that runs a single program.
//!
//! This crate handles:
//! - Dotted version comparison with a lexical fallback
//! - Bounded streaming download into a temp store entry
//! - Artifact sanitization (size, entry guard, declared version)
//! - Atomic install of the artifact as the live program
//!
//! ## Safety model
//!
//! The artifact is never executed. Its declared version is read by parsing
//! the declaration, and nothing is installed unless every check passed. Every
//! failure path removes the temp entry. Artifacts are not signed; authenticity
//! rests on the transport.

pub mod artifact;
pub mod config;
pub mod download;
pub mod error;
pub mod install;
pub mod manager;
#[cfg(test)]
mod proptests;
pub mod store;
pub mod transport;
pub mod version;

// Re-export main types for convenience
pub use artifact::{
    read_declared_version, ArtifactValidator, LiteralVersionProbe, Validator, VersionProbe,
};
pub use config::{NetworkConfig, RestartConfig, UpdateConfig};
pub use download::{ArtifactSource, BoundedDownloader, DownloadProgress, Downloader, TempArtifact};
pub use error::UpdateError;
pub use install::{InstallManager, Installer};
pub use manager::{UpdateOrchestrator, UpdateOutcome, UpdateStage, UpdateState};
pub use store::{FsStore, MemoryStore, ProgramStore, StoreWriter};
pub use transport::{ArtifactTransport, ChunkStream, HttpTransport};
pub use version::{is_newer, Version};
