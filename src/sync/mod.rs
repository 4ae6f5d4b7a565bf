use std::path::{Path, PathBuf};

use log::debug;

use crate::engine::models::{ArtifactDescriptor, Manifest, Platform};
use crate::storage::{ArtifactStatus, StorageManager};

pub mod executor;

pub use executor::{SyncExecutor, SyncReport};

/// How an artifact on disk is judged up to date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IntegrityCheck {
    /// Existence and size only.
    #[default]
    Size,
    /// Size, then the SHA-256 digest when the manifest carries one.
    Checksum,
}

/// Artifacts to download this cycle, in manifest order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncPlan {
    artifacts: Vec<ArtifactDescriptor>,
}

impl SyncPlan {
    pub fn new(artifacts: Vec<ArtifactDescriptor>) -> Self {
        Self { artifacts }
    }

    pub fn artifacts(&self) -> &[ArtifactDescriptor] {
        &self.artifacts
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.expected_size).sum()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.artifacts
            .iter()
            .map(|a| a.relative_path.as_str())
            .collect()
    }
}

/// Artifacts for `platform` whose file under `install_root` is missing or
/// stale. An empty plan means nothing to download.
pub fn plan(
    manifest: &Manifest,
    install_root: &Path,
    platform: &Platform,
    integrity: IntegrityCheck,
) -> SyncPlan {
    let storage = StorageManager::new(install_root);
    let artifacts = manifest
        .applicable(platform)
        .filter(|artifact| {
            let status = storage.artifact_status(artifact, integrity);
            match &status {
                ArtifactStatus::Current => {}
                ArtifactStatus::Missing => {
                    debug!("plan: {} missing", artifact.relative_path);
                }
                ArtifactStatus::SizeMismatch { actual } => debug!(
                    "plan: {} is {} bytes, expected {}",
                    artifact.relative_path, actual, artifact.expected_size
                ),
                ArtifactStatus::ChecksumMismatch { actual } => {
                    debug!("plan: {} digest {} differs", artifact.relative_path, actual);
                }
            }
            status.needs_update()
        })
        .cloned()
        .collect();
    SyncPlan::new(artifacts)
}

/// `plan` on the blocking pool, since digest checks read whole files.
pub async fn plan_blocking(
    manifest: Manifest,
    install_root: PathBuf,
    platform: Platform,
    integrity: IntegrityCheck,
) -> Result<SyncPlan, String> {
    tokio::task::spawn_blocking(move || plan(&manifest, &install_root, &platform, integrity))
        .await
        .map_err(|e| format!("planning task failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::Version;

    fn linux() -> Platform {
        Platform::new("linux", "x86_64")
    }

    fn manifest(artifacts: Vec<ArtifactDescriptor>) -> Manifest {
        Manifest {
            source_base_uri: "https://example.com/app/".into(),
            entry_point: "bin/app".into(),
            version: Version::new(1, 0, 0),
            launch_arguments: None,
            artifacts,
        }
    }

    fn write(root: &Path, relative: &str, len: usize) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; len]).unwrap();
    }

    #[test]
    fn empty_when_installation_matches() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.lib", 100);
        write(dir.path(), "lib/b.lib", 250);
        let manifest = manifest(vec![
            ArtifactDescriptor::new("a.lib", 100),
            ArtifactDescriptor::new("lib/b.lib", 250),
        ]);

        let plan = plan(&manifest, dir.path(), &linux(), IntegrityCheck::Size);
        assert!(plan.is_empty());
        assert_eq!(plan.total_bytes(), 0);
    }

    #[test]
    fn picks_missing_and_resized_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.lib", 100);
        write(dir.path(), "c.lib", 9);
        let manifest = manifest(vec![
            ArtifactDescriptor::new("c.lib", 10),
            ArtifactDescriptor::new("a.lib", 100),
            ArtifactDescriptor::new("b.lib", 250),
        ]);

        let plan = plan(&manifest, dir.path(), &linux(), IntegrityCheck::Size);
        assert_eq!(plan.paths(), vec!["c.lib", "b.lib"]);
        assert_eq!(plan.total_bytes(), 260);
    }

    #[test]
    fn scenario_only_missing_artifact_is_planned() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.lib", 100);
        let manifest = manifest(vec![
            ArtifactDescriptor::new("a.lib", 100),
            ArtifactDescriptor::new("b.lib", 250),
        ]);

        let plan = plan(&manifest, dir.path(), &linux(), IntegrityCheck::Size);
        assert_eq!(plan.paths(), vec!["b.lib"]);
        assert_eq!(plan.total_bytes(), 250);
    }

    #[test]
    fn foreign_platform_artifacts_are_never_planned() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "native-win.dll", 3);
        let manifest = manifest(vec![
            ArtifactDescriptor::new("native-win.dll", 50).with_platform("windows"),
            ArtifactDescriptor::new("native-mac.dylib", 50).with_platform("mac"),
            ArtifactDescriptor::new("native-arm.so", 50).with_platform("linux-aarch64"),
            ArtifactDescriptor::new("native.so", 50).with_platform("linux"),
        ]);

        let plan = plan(&manifest, dir.path(), &linux(), IntegrityCheck::Size);
        assert_eq!(plan.paths(), vec!["native.so"]);
    }

    #[test]
    fn same_size_corruption_needs_checksum_mode() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.lib", 4);
        let mut artifact = ArtifactDescriptor::new("a.lib", 4);
        artifact.sha256 = Some("f".repeat(64));
        let manifest = manifest(vec![artifact]);

        assert!(plan(&manifest, dir.path(), &linux(), IntegrityCheck::Size).is_empty());
        assert_eq!(
            plan(&manifest, dir.path(), &linux(), IntegrityCheck::Checksum).len(),
            1
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn checksum_planning_runs_on_the_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.lib", 4);
        write(dir.path(), "b.lib", 4);
        let mut stale = ArtifactDescriptor::new("a.lib", 4);
        stale.sha256 = Some("f".repeat(64));
        let manifest = manifest(vec![stale, ArtifactDescriptor::new("b.lib", 4)]);

        let runtime_thread = std::thread::current().id();
        let planned = plan_blocking(
            manifest.clone(),
            dir.path().to_path_buf(),
            linux(),
            IntegrityCheck::Checksum,
        )
        .await
        .unwrap();
        assert_eq!(
            planned,
            plan(&manifest, dir.path(), &linux(), IntegrityCheck::Checksum)
        );
        assert_eq!(planned.paths(), vec!["a.lib"]);

        let worker = tokio::task::spawn_blocking(|| std::thread::current().id())
            .await
            .unwrap();
        assert_ne!(worker, runtime_thread);
    }
}
