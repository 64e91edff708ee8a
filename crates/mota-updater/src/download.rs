//! Bounded artifact downloader.
//!
//! Streams the artifact into the temp entry of the program store in fixed-size
//! chunks, aborting as soon as the running total passes the size ceiling.
//! Whatever happens, the stream is closed before `download` returns and a
//! failed attempt leaves no temp entry behind.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::config::UpdateConfig;
use crate::error::UpdateError;
use crate::store::ProgramStore;
use crate::transport::{ArtifactTransport, ChunkStream};
use crate::version::Version;

/// Where to fetch an update from and which version it must declare.
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    locator: String,
    target: Version,
}

impl ArtifactSource {
    pub fn new(locator: impl Into<String>, target: impl Into<Version>) -> Self {
        Self {
            locator: locator.into(),
            target: target.into(),
        }
    }

    /// Opaque locator handed to the transport (usually a URL).
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Version the artifact is expected to declare.
    pub fn target(&self) -> &Version {
        &self.target
    }
}

/// A completed download sitting in the store's temp entry.
///
/// Not `Clone`: installing or discarding consumes it.
#[derive(Debug)]
pub struct TempArtifact {
    name: String,
    size: u64,
    sha256: Option<[u8; 32]>,
}

impl TempArtifact {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            sha256: None,
        }
    }

    fn with_sha256(mut self, digest: [u8; 32]) -> Self {
        self.sha256 = Some(digest);
        self
    }

    /// Store entry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes written by the download.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Hex SHA-256 of the downloaded bytes, for logs and reports.
    pub fn sha256_hex(&self) -> Option<String> {
        self.sha256.map(hex::encode)
    }
}

/// Fetches an artifact into the temp entry.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, source: &ArtifactSource) -> Result<TempArtifact, UpdateError>;
}

/// Progress callback type for download progress reporting.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Downloader that enforces a hard byte ceiling.
pub struct BoundedDownloader {
    transport: Arc<dyn ArtifactTransport>,
    store: Arc<dyn ProgramStore>,
    temp_name: String,
    max_size: u64,
    chunk_size: usize,
    progress_callback: Option<ProgressCallback>,
}

impl BoundedDownloader {
    pub fn new(
        transport: Arc<dyn ArtifactTransport>,
        store: Arc<dyn ProgramStore>,
        config: &UpdateConfig,
    ) -> Self {
        Self {
            transport,
            store,
            temp_name: config.temp_name.clone(),
            max_size: config.max_size,
            chunk_size: config.chunk_size,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
    }

    /// Clear the progress callback.
    pub fn clear_progress_callback(&mut self) {
        self.progress_callback = None;
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copy the stream into the temp entry, enforcing the ceiling.
    async fn pump(&self, stream: &mut dyn ChunkStream) -> Result<TempArtifact, UpdateError> {
        let mut writer = self.store.create(&self.temp_name)?;
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;

        while let Some(chunk) = stream.read_chunk(self.chunk_size).await? {
            total += chunk.len() as u64;
            if total > self.max_size {
                error!(
                    limit = self.max_size,
                    received = total,
                    "Artifact exceeds size limit, aborting download"
                );
                return Err(UpdateError::Oversize {
                    limit: self.max_size,
                    actual: total,
                });
            }

            writer.append(&chunk)?;
            hasher.update(&chunk);
            self.report_progress(total);
        }

        writer.finish()?;
        Ok(TempArtifact::new(&self.temp_name, total).with_sha256(hasher.finalize().into()))
    }

    /// Best-effort removal of a partial temp entry.
    fn discard_partial(&self) {
        match self.store.remove(&self.temp_name) {
            Ok(true) => debug!("Removed partial download {}", self.temp_name),
            Ok(false) => {}
            Err(e) => debug!("Could not remove partial download {}: {}", self.temp_name, e),
        }
    }

    /// Report download progress via the callback if set.
    fn report_progress(&self, downloaded: u64) {
        if let Some(callback) = &self.progress_callback {
            callback(DownloadProgress {
                downloaded,
                limit: self.max_size,
            });
        }
    }
}

#[async_trait]
impl Downloader for BoundedDownloader {
    async fn download(&self, source: &ArtifactSource) -> Result<TempArtifact, UpdateError> {
        info!("Downloading {} -> {}", source.locator(), self.temp_name);

        let mut stream = match self.transport.open(source.locator()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Could not open {}: {}", source.locator(), e);
                self.discard_partial();
                return Err(e);
            }
        };

        let result = self.pump(stream.as_mut()).await;
        stream.close().await;

        match result {
            Ok(artifact) => {
                info!(
                    bytes = artifact.size(),
                    sha256 = %artifact.sha256_hex().unwrap_or_default(),
                    "Download complete"
                );
                Ok(artifact)
            }
            Err(e) => {
                warn!("Download failed: {}", e);
                self.discard_partial();
                Err(e)
            }
        }
    }
}

/// Download progress information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes accepted so far.
    pub downloaded: u64,
    /// Size ceiling for this download.
    pub limit: u64,
}

impl DownloadProgress {
    /// Share of the size ceiling used so far (0.0 to 100.0).
    pub fn percentage_of_limit(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            (self.downloaded as f64 / self.limit as f64) * 100.0
        }
    }

    /// Bytes that may still arrive before the ceiling is hit.
    pub fn headroom(&self) -> u64 {
        self.limit.saturating_sub(self.downloaded)
    }
}

impl std::fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} bytes ({:.1}% of limit)",
            self.downloaded,
            self.limit,
            self.percentage_of_limit()
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;

    /// Scripted stream step.
    #[derive(Clone)]
    pub enum Step {
        Data(Vec<u8>),
        Fail(String),
    }

    /// Transport that replays a fixed script and counts opens and closes.
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub script: Mutex<Vec<Step>>,
        pub refuse: Option<String>,
        pub opens: Arc<AtomicUsize>,
        pub closes: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        pub fn chunks(count: usize, len: usize) -> Self {
            Self::with_steps(vec![Step::Data(vec![b'#'; len]); count])
        }

        pub fn with_steps(steps: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(steps),
                ..Default::default()
            }
        }

        pub fn refusing(reason: &str) -> Self {
            Self {
                refuse: Some(reason.to_string()),
                ..Default::default()
            }
        }
    }

    struct ScriptedStream {
        steps: VecDeque<Step>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ArtifactTransport for ScriptedTransport {
        async fn open(&self, _locator: &str) -> Result<Box<dyn ChunkStream>, UpdateError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if let Some(reason) = &self.refuse {
                return Err(UpdateError::Transport(reason.clone()));
            }
            let steps = self.script.lock().unwrap().clone();
            Ok(Box::new(ScriptedStream {
                steps: steps.into(),
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    #[async_trait]
    impl ChunkStream for ScriptedStream {
        async fn read_chunk(&mut self, _max_len: usize) -> Result<Option<Bytes>, UpdateError> {
            match self.steps.pop_front() {
                Some(Step::Data(data)) => Ok(Some(Bytes::from(data))),
                Some(Step::Fail(reason)) => Err(UpdateError::Transport(reason)),
                None => Ok(None),
            }
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
