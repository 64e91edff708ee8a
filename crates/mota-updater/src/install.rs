//! Live program installation.
//!
//! The validated temp artifact replaces the live program through a single
//! store rename. Before the rename the old program (or none) is intact; after
//! it the new program is fully in place.
//!
//! There is no backup slot. The old program is removed before the rename, so
//! a failed rename can leave the device without a live program; that case is
//! reported as [`UpdateError::Install`] and needs manual recovery.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::UpdateConfig;
use crate::download::TempArtifact;
use crate::error::UpdateError;
use crate::store::ProgramStore;

/// Promotes or discards temp artifacts.
pub trait Installer: Send + Sync {
    /// Replace the live program with `artifact`.
    fn install(&self, artifact: TempArtifact) -> Result<(), UpdateError>;

    /// Drop an artifact that will not be installed.
    fn discard(&self, artifact: TempArtifact);
}

/// Installs into the live slot of a [`ProgramStore`].
pub struct InstallManager {
    store: Arc<dyn ProgramStore>,
    live_name: String,
}

impl InstallManager {
    pub fn new(store: Arc<dyn ProgramStore>, config: &UpdateConfig) -> Self {
        Self {
            store,
            live_name: config.live_name.clone(),
        }
    }

    /// Name of the live program entry.
    pub fn live_name(&self) -> &str {
        &self.live_name
    }

    fn remove_quietly(&self, name: &str) {
        match self.store.remove(name) {
            Ok(true) => debug!("Removed leftover {}", name),
            Ok(false) => {}
            Err(e) => debug!("Could not remove {}: {}", name, e),
        }
    }
}

impl Installer for InstallManager {
    fn install(&self, artifact: TempArtifact) -> Result<(), UpdateError> {
        info!("Installing {} as {}", artifact.name(), self.live_name);

        match self.store.remove(&self.live_name) {
            Ok(true) => debug!("Removed old {}", self.live_name),
            Ok(false) => debug!("No existing {} to remove", self.live_name),
            Err(e) => warn!("Could not remove old {}: {}", self.live_name, e),
        }

        let renamed = self.store.rename(artifact.name(), &self.live_name);

        // Covers filesystems where a failed or partial rename leaves the source.
        self.remove_quietly(artifact.name());

        match renamed {
            Ok(()) => {
                info!(
                    bytes = artifact.size(),
                    sha256 = %artifact.sha256_hex().unwrap_or_default(),
                    "Update installed"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to move {} into place: {}. {} may be missing and need manual recovery",
                    artifact.name(),
                    e,
                    self.live_name
                );
                Err(UpdateError::Install(format!(
                    "failed to rename {} to {}: {}",
                    artifact.name(),
                    self.live_name,
                    e
                )))
            }
        }
    }

    fn discard(&self, artifact: TempArtifact) {
        debug!("Discarding {}", artifact.name());
        self.remove_quietly(artifact.name());
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::store::{MemoryStore, StoreWriter};
    use tempfile::TempDir;

    fn manager(store: Arc<dyn ProgramStore>) -> InstallManager {
        InstallManager::new(store, &UpdateConfig::default())
    }

    #[test]
    fn test_install_replaces_live_program() {
        let store = MemoryStore::new();
        store.put("main.py", "old").unwrap();
        store.put("ota-update.temp.py", "new program").unwrap();

        manager(Arc::new(store.clone()))
            .install(TempArtifact::new("ota-update.temp.py", 11))
            .unwrap();

        assert_eq!(store.get("main.py").unwrap(), b"new program");
        assert_eq!(store.size("ota-update.temp.py").unwrap(), None);
    }

    #[test]
    fn test_first_install_without_live_program() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ota-update.temp.py"), b"first").unwrap();
        let store = crate::store::FsStore::new(dir.path());

        manager(Arc::new(store))
            .install(TempArtifact::new("ota-update.temp.py", 5))
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("main.py")).unwrap(), b"first");
        assert!(!dir.path().join("ota-update.temp.py").exists());
    }

    #[test]
    fn test_missing_artifact_is_install_error() {
        let store = MemoryStore::new();
        store.put("main.py", "old").unwrap();

        let err = manager(Arc::new(store.clone()))
            .install(TempArtifact::new("ota-update.temp.py", 0))
            .unwrap_err();
        assert!(matches!(err, UpdateError::Install(_)));
        // the known window: old program already removed
        assert_eq!(store.get("main.py"), None);
    }

    /// Store whose rename always fails, to check temp cleanup.
    struct BrokenRename(MemoryStore);

    impl ProgramStore for BrokenRename {
        fn create(&self, name: &str) -> io::Result<Box<dyn StoreWriter>> {
            self.0.create(name)
        }
        fn size(&self, name: &str) -> io::Result<Option<u64>> {
            self.0.size(name)
        }
        fn remove(&self, name: &str) -> io::Result<bool> {
            self.0.remove(name)
        }
        fn rename(&self, _from: &str, _to: &str) -> io::Result<()> {
            Err(io::Error::other("read-only filesystem"))
        }
        fn open(&self, name: &str) -> io::Result<Box<dyn io::BufRead + Send>> {
            self.0.open(name)
        }
    }

    #[test]
    fn test_failed_rename_still_removes_temp() {
        let inner = MemoryStore::new();
        inner.put("ota-update.temp.py", "new").unwrap();

        let err = manager(Arc::new(BrokenRename(inner.clone())))
            .install(TempArtifact::new("ota-update.temp.py", 3))
            .unwrap_err();
        assert!(matches!(err, UpdateError::Install(ref m) if m.contains("read-only")));
        assert_eq!(inner.size("ota-update.temp.py").unwrap(), None);
    }

    #[test]
    fn test_discard_removes_temp() {
        let store = MemoryStore::new();
        store.put("ota-update.temp.py", "junk").unwrap();
        store.put("main.py", "live").unwrap();

        manager(Arc::new(store.clone())).discard(TempArtifact::new("ota-update.temp.py", 4));
        assert_eq!(store.names(), vec!["main.py".to_string()]);
    }
}
