use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use log::{debug, warn};
use reqwest::{Client, Url};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Read size for local (`file://`) sources.
pub const CHUNK_SIZE: usize = 64 * 1024;

pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, String>>;

/// Where manifests and artifacts come from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetch a whole (small) document, e.g. the remote manifest.
    async fn fetch_text(&self, url: &Url) -> Result<String, String>;

    /// Open a streaming read of one artifact.
    async fn open_stream(&self, url: &Url) -> Result<ChunkStream, String>;
}

#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
}

impl NetworkClient {
    /// `timeout` bounds connecting and every individual read, not the whole
    /// transfer, so large artifacts still download on slow links.
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, String> {
        self.client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("{url} returned an error status: {e}"))
    }
}

#[async_trait]
impl ArtifactSource for NetworkClient {
    async fn fetch_text(&self, url: &Url) -> Result<String, String> {
        match url.scheme() {
            "http" | "https" => self
                .get(url)
                .await?
                .text()
                .await
                .map_err(|e| format!("failed to read {url}: {e}")),
            "file" => {
                let path = local_path(url)?;
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| format!("failed to read {}: {e}", path.display()))
            }
            other => Err(format!("unsupported scheme '{other}' in {url}")),
        }
    }

    async fn open_stream(&self, url: &Url) -> Result<ChunkStream, String> {
        match url.scheme() {
            "http" | "https" => {
                let response = self.get(url).await?;
                debug!(
                    "network: streaming {} ({:?} bytes announced)",
                    url,
                    response.content_length()
                );
                let stream = response.bytes_stream().map(|chunk| {
                    chunk
                        .map(|bytes| bytes.to_vec())
                        .map_err(|e| format!("stream error: {e}"))
                });
                Ok(stream.boxed())
            }
            "file" => {
                let path = local_path(url)?;
                let file = File::open(&path)
                    .await
                    .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
                Ok(file_chunks(file))
            }
            other => Err(format!("unsupported scheme '{other}' in {url}")),
        }
    }
}

fn local_path(url: &Url) -> Result<std::path::PathBuf, String> {
    url.to_file_path()
        .map_err(|_| format!("{url} is not a local file path"))
}

fn file_chunks(file: File) -> ChunkStream {
    stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let read = file
            .read(&mut buf)
            .await
            .map_err(|e| format!("read error: {e}"))?;
        if read == 0 {
            return Ok(None);
        }
        buf.truncate(read);
        Ok(Some((buf, file)))
    })
    .boxed()
}
