use std::path::Path;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::engine::models::{ArtifactDescriptor, Manifest};
use crate::engine::state::SyncProgress;
use crate::error::SyncError;
use crate::networking::ArtifactSource;
use crate::sync::SyncPlan;
use crate::util::progress_ratio;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub artifacts: usize,
    pub bytes: u64,
}

/// Highest ratio reported while bytes are still arriving; only a finished
/// plan reports 1.0.
const IN_FLIGHT_CEILING: f64 = 0.999;

/// Running total across the whole plan; the reported ratio never goes back.
/// Each artifact counts for at most its expected size, so `written` never
/// passes `total`.
struct ProgressTracker {
    total: u64,
    written: u64,
    budget: u64,
    last_ratio: f64,
}

impl ProgressTracker {
    fn new(total: u64) -> Self {
        Self {
            total,
            written: 0,
            budget: 0,
            last_ratio: 0.0,
        }
    }

    fn begin(&mut self, artifact: &ArtifactDescriptor) {
        self.budget = artifact.expected_size;
    }

    fn advance(&mut self, bytes: u64) -> SyncProgress {
        let counted = bytes.min(self.budget);
        self.budget -= counted;
        self.written += counted;
        let ratio = progress_ratio(self.written, self.total).min(IN_FLIGHT_CEILING);
        self.last_ratio = self.last_ratio.max(ratio);
        self.snapshot()
    }

    fn finish(&mut self) -> SyncProgress {
        self.last_ratio = 1.0;
        self.snapshot()
    }

    fn snapshot(&self) -> SyncProgress {
        SyncProgress {
            written: self.written,
            total: self.total,
            ratio: self.last_ratio,
        }
    }
}

/// Downloads a plan into the installation root, overwriting in place.
pub struct SyncExecutor<'a> {
    source: &'a dyn ArtifactSource,
    install_root: &'a Path,
}

impl<'a> SyncExecutor<'a> {
    pub fn new(source: &'a dyn ArtifactSource, install_root: &'a Path) -> Self {
        Self {
            source,
            install_root,
        }
    }

    /// Stops at the first failing artifact. Files finished before it stay,
    /// the failing one is left truncated and later ones are not touched; the
    /// next plan picks all of them up again by size.
    pub async fn execute<F>(
        &self,
        manifest: &Manifest,
        plan: &SyncPlan,
        mut progress: F,
    ) -> Result<SyncReport, SyncError>
    where
        F: FnMut(SyncProgress),
    {
        let mut tracker = ProgressTracker::new(plan.total_bytes());
        info!(
            "sync: downloading {} artifacts ({} bytes)",
            plan.len(),
            plan.total_bytes()
        );

        let mut bytes = 0u64;
        for artifact in plan.artifacts() {
            tracker.begin(artifact);
            let written = self
                .download(manifest, artifact, &mut tracker, &mut progress)
                .await?;
            if written != artifact.expected_size {
                warn!(
                    "sync: {} delivered {} bytes, manifest says {}; it will be fetched again next launch",
                    artifact.relative_path, written, artifact.expected_size
                );
            }
            bytes += written;
        }

        progress(tracker.finish());
        info!("sync: finished, {bytes} bytes written");
        Ok(SyncReport {
            artifacts: plan.len(),
            bytes,
        })
    }

    async fn download<F>(
        &self,
        manifest: &Manifest,
        artifact: &ArtifactDescriptor,
        tracker: &mut ProgressTracker,
        progress: &mut F,
    ) -> Result<u64, SyncError>
    where
        F: FnMut(SyncProgress),
    {
        let target = artifact.local_path(self.install_root);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| SyncError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let url = manifest
            .artifact_url(artifact)
            .map_err(|cause| SyncError::Source {
                path: artifact.relative_path.clone(),
                cause,
            })?;
        debug!("sync: {} -> {}", url, target.display());
        let mut stream = self
            .source
            .open_stream(&url)
            .await
            .map_err(|cause| transfer(artifact, cause))?;
        let mut file = File::create(&target).await.map_err(|source| io(&target, source))?;

        let mut written = 0u64;
        let copied = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|cause| transfer(artifact, cause))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|source| io(&target, source))?;
                written += chunk.len() as u64;
                progress(tracker.advance(chunk.len() as u64));
            }
            Ok::<(), SyncError>(())
        }
        .await;

        // Flush in both cases so a broken transfer leaves its partial bytes
        // on disk for the next size check.
        let flushed = file.flush().await.map_err(|source| io(&target, source));
        copied?;
        flushed?;
        Ok(written)
    }
}

fn transfer(artifact: &ArtifactDescriptor, cause: String) -> SyncError {
    SyncError::Transfer {
        path: artifact.relative_path.clone(),
        cause,
    }
}

fn io(path: &Path, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.to_path_buf(),
        source,
    }
}
