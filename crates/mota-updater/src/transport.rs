//! Byte-stream source for artifacts.
//!
//! The downloader only needs three things from the network: open a stream for
//! a locator (failing on a non-success status), read bounded chunks without
//! buffering the whole body, and release the connection on close.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::UpdateError;

/// Opens artifact streams.
#[async_trait]
pub trait ArtifactTransport: Send + Sync {
    /// Open a stream for `locator`. A non-success response is an error.
    async fn open(&self, locator: &str) -> Result<Box<dyn ChunkStream>, UpdateError>;
}

/// An open artifact body.
#[async_trait]
pub trait ChunkStream: Send {
    /// Read the next chunk of at most `max_len` bytes. `None` at end of stream.
    /// Returned chunks are never empty.
    async fn read_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>, UpdateError>;

    /// Release the underlying connection. Safe to call more than once.
    async fn close(&mut self);
}

/// HTTP(S) transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the configured timeouts and user agent.
    pub fn new(config: &NetworkConfig) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .read_timeout(Duration::from_secs(config.read_timeout_seconds))
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactTransport for HttpTransport {
    async fn open(&self, locator: &str) -> Result<Box<dyn ChunkStream>, UpdateError> {
        debug!("Requesting {}", locator);
        let response = self.client.get(locator).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Transport(format!(
                "failed to download {}: status code {}",
                locator,
                status.as_u16()
            )));
        }
        Ok(Box::new(HttpChunkStream {
            body: Some(response.bytes_stream().boxed()),
            pending: Bytes::new(),
        }))
    }
}

/// Re-chunks the response body into reads of a caller-chosen size.
struct HttpChunkStream {
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    pending: Bytes,
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn read_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>, UpdateError> {
        while self.pending.is_empty() {
            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };
            match body.next().await {
                Some(Ok(bytes)) => self.pending = bytes,
                Some(Err(e)) => return Err(UpdateError::Transport(e.to_string())),
                None => {
                    self.body = None;
                    return Ok(None);
                }
            }
        }
        let take = max_len.max(1).min(self.pending.len());
        Ok(Some(self.pending.split_to(take)))
    }

    async fn close(&mut self) {
        if self.body.take().is_some() {
            debug!("Closed artifact stream");
        }
        self.pending = Bytes::new();
    }
}
