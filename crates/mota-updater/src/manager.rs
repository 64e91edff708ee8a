//! Update orchestrator - drives one complete update attempt.
//!
//! ```text
//! CHECK -> (not newer) -> NoUpdateNeeded
//! CHECK -> (newer) -> DOWNLOAD -> VALIDATE -> INSTALL -> UpdateInstalled
//!                         |           |          |
//!                        fail        fail       fail -> UpdateFailed
//! ```
//!
//! The orchestrator does no I/O of its own; every step goes through the
//! [`Downloader`], [`Validator`] and [`Installer`] traits.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::artifact::{ArtifactValidator, Validator};
use crate::config::UpdateConfig;
use crate::download::{ArtifactSource, BoundedDownloader, DownloadProgress, Downloader};
use crate::error::UpdateError;
use crate::install::{InstallManager, Installer};
use crate::store::ProgramStore;
use crate::transport::ArtifactTransport;
use crate::version::is_newer;

/// Step that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    Download,
    Validate,
    Install,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateStage::Download => "download",
            UpdateStage::Validate => "validate",
            UpdateStage::Install => "install",
        };
        f.write_str(name)
    }
}

/// Result of one [`UpdateOrchestrator::run`].
#[derive(Debug)]
pub enum UpdateOutcome {
    /// The target is not newer than the running version.
    NoUpdateNeeded,
    /// The new program is live; the device should restart now.
    UpdateInstalled { version: String },
    /// A step failed; later steps were skipped.
    UpdateFailed { stage: UpdateStage, error: UpdateError },
}

impl UpdateOutcome {
    /// Whether the host should restart the device.
    pub fn restart_required(&self) -> bool {
        matches!(self, UpdateOutcome::UpdateInstalled { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, UpdateOutcome::UpdateFailed { .. })
    }
}

/// Current state of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpdateState {
    /// Idle, no update in progress
    #[default]
    Idle,
    /// Comparing versions
    Checking,
    /// Downloading the artifact
    Downloading,
    /// Validating the downloaded artifact
    Validating,
    /// Promoting the artifact to the live slot
    Installing,
    /// Update complete, restart required
    RestartRequired,
    /// Last run failed
    Failed(String),
}

/// Runs the check, download, validate, install sequence.
///
/// The engine is not reentrant: the temp and live entries are shared by every
/// orchestrator over the same store, so callers must not drive two of them at
/// once. `run` takes `&mut self`, which rules out overlapping runs on one
/// orchestrator.
pub struct UpdateOrchestrator {
    downloader: Box<dyn Downloader>,
    validator: Box<dyn Validator>,
    installer: Box<dyn Installer>,
    state: UpdateState,
}

impl UpdateOrchestrator {
    /// Create an orchestrator from its three collaborators.
    pub fn new(
        downloader: Box<dyn Downloader>,
        validator: Box<dyn Validator>,
        installer: Box<dyn Installer>,
    ) -> Self {
        Self {
            downloader,
            validator,
            installer,
            state: UpdateState::Idle,
        }
    }

    /// Wire the standard components over one transport and one store.
    pub fn from_config(
        config: &UpdateConfig,
        transport: Arc<dyn ArtifactTransport>,
        store: Arc<dyn ProgramStore>,
    ) -> Result<Self, UpdateError> {
        Self::from_config_with_progress(config, transport, store, None::<fn(DownloadProgress)>)
    }

    /// Like [`from_config`](Self::from_config), reporting download progress.
    pub fn from_config_with_progress<F>(
        config: &UpdateConfig,
        transport: Arc<dyn ArtifactTransport>,
        store: Arc<dyn ProgramStore>,
        progress: Option<F>,
    ) -> Result<Self, UpdateError>
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        config.validate()?;

        let mut downloader = BoundedDownloader::new(transport, Arc::clone(&store), config);
        if let Some(callback) = progress {
            downloader.set_progress_callback(callback);
        }
        let validator = ArtifactValidator::new(Arc::clone(&store), config);
        let installer = InstallManager::new(store, config);

        Ok(Self::new(
            Box::new(downloader),
            Box::new(validator),
            Box::new(installer),
        ))
    }

    /// Get the current state.
    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    fn fail(&mut self, stage: UpdateStage, error: UpdateError) -> UpdateOutcome {
        error!("Update failed during {}: {}", stage, error);
        self.state = UpdateState::Failed(format!("{}: {}", stage, error));
        UpdateOutcome::UpdateFailed { stage, error }
    }

    /// Perform one update attempt from `current_version` to `source.target()`.
    ///
    /// Nothing is retried. Calling `run` again after a failure starts a fresh,
    /// independent attempt.
    pub async fn run(&mut self, current_version: &str, source: &ArtifactSource) -> UpdateOutcome {
        info!("Starting OTA update check");
        self.state = UpdateState::Checking;

        let target = source.target();
        if !is_newer(current_version, target.as_str()) {
            info!(
                "No update needed (current: {}, offered: {})",
                current_version, target
            );
            self.state = UpdateState::Idle;
            return UpdateOutcome::NoUpdateNeeded;
        }
        info!(
            "New version {} available, current version {}",
            target, current_version
        );

        self.state = UpdateState::Downloading;
        let artifact = match self.downloader.download(source).await {
            Ok(artifact) => artifact,
            Err(e) => return self.fail(UpdateStage::Download, e),
        };

        self.state = UpdateState::Validating;
        if let Err(e) = self.validator.validate(&artifact, target) {
            self.installer.discard(artifact);
            return self.fail(UpdateStage::Validate, e);
        }

        self.state = UpdateState::Installing;
        if let Err(e) = self.installer.install(artifact) {
            return self.fail(UpdateStage::Install, e);
        }

        info!("Version {} installed, restart required", target);
        self.state = UpdateState::RestartRequired;
        UpdateOutcome::UpdateInstalled {
            version: target.to_string(),
        }
    }
}
