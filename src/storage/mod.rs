use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::engine::models::{ArtifactDescriptor, MANIFEST_FILE, Manifest};
use crate::sync::IntegrityCheck;

/// What the installation root holds for one artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactStatus {
    Current,
    Missing,
    SizeMismatch { actual: u64 },
    ChecksumMismatch { actual: String },
}

impl ArtifactStatus {
    pub fn needs_update(&self) -> bool {
        !matches!(self, ArtifactStatus::Current)
    }
}

#[derive(Clone, Debug)]
pub struct StorageManager {
    install_root: PathBuf,
}

impl StorageManager {
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
        }
    }

    /// Well-known location of the last manifest that was used.
    pub fn cache_path(&self) -> PathBuf {
        self.install_root.join(MANIFEST_FILE)
    }

    /// `Ok(None)` when nothing has been cached yet.
    pub async fn read_cached_manifest(&self) -> Result<Option<Manifest>, String> {
        let path = self.cache_path();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(format!("unable to read {}: {err}", path.display())),
        };
        Manifest::from_json(&raw)
            .map(Some)
            .map_err(|e| format!("{}: {e}", path.display()))
    }

    pub async fn write_cached_manifest(&self, manifest: &Manifest) -> Result<(), String> {
        let path = self.cache_path();
        fs::create_dir_all(&self.install_root)
            .await
            .map_err(|e| format!("unable to create install dir: {e}"))?;
        let json = manifest.to_json()?;
        fs::write(&path, json.as_bytes())
            .await
            .map_err(|e| format!("unable to persist manifest: {e}"))?;
        debug!("storage: manifest cached at {}", path.display());
        Ok(())
    }

    pub fn artifact_path(&self, artifact: &ArtifactDescriptor) -> PathBuf {
        artifact.local_path(&self.install_root)
    }

    /// Compare the file on disk against the descriptor. Size is always
    /// checked; the digest only when requested and known.
    pub fn artifact_status(
        &self,
        artifact: &ArtifactDescriptor,
        integrity: IntegrityCheck,
    ) -> ArtifactStatus {
        let path = self.artifact_path(artifact);
        let meta = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            _ => return ArtifactStatus::Missing,
        };
        if meta.len() != artifact.expected_size {
            return ArtifactStatus::SizeMismatch { actual: meta.len() };
        }
        if integrity == IntegrityCheck::Checksum
            && let Some(expected) = artifact.sha256.as_deref()
        {
            match sha256_file(&path) {
                Ok(actual) if actual.eq_ignore_ascii_case(expected.trim()) => {}
                Ok(actual) => return ArtifactStatus::ChecksumMismatch { actual },
                Err(err) => {
                    debug!("storage: {err}");
                    return ArtifactStatus::Missing;
                }
            }
        }
        ArtifactStatus::Current
    }
}

/// Lowercase hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String, String> {
    let mut file = File::open(path).map_err(|e| format!("checksum open error: {e}"))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|e| format!("checksum read error: {e}"))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
