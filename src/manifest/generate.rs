use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::engine::models::{ArtifactDescriptor, MANIFEST_FILE, Manifest, Version, canonical_os};
use crate::storage::sha256_file;

/// File name prefix of the launcher's own files next to the manifest, which
/// never go into it.
const LAUNCHER_PREFIX: &str = env!("CARGO_PKG_NAME");

#[derive(Clone, Debug)]
pub struct GenerateOptions {
    pub base_uri: String,
    pub entry_point: String,
    pub app_dir: PathBuf,
    pub version: Version,
    pub launch_arguments: Option<String>,
    /// Extensions (without dot) to pick up; empty means every file.
    pub extensions: Vec<String>,
    pub checksums: bool,
}

/// Scan `app_dir` and describe every recognised artifact in it.
pub fn create(options: &GenerateOptions) -> Result<Manifest, String> {
    let root = options.app_dir.as_path();
    if !root.is_dir() {
        return Err(format!("{} is not a directory", root.display()));
    }

    let mut artifacts = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| format!("scan error: {e}"))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let at_root = entry.depth() == 1;
        if at_root && (name == MANIFEST_FILE || name.starts_with(LAUNCHER_PREFIX)) {
            debug!("generate: skipping {}", entry.path().display());
            continue;
        }
        if !recognised(entry.path(), &options.extensions) {
            continue;
        }

        let relative_path = relative_path(root, entry.path())?;
        let size = entry
            .metadata()
            .map_err(|e| format!("cannot stat {}: {e}", entry.path().display()))?
            .len();
        let mut artifact = ArtifactDescriptor::new(relative_path, size);
        artifact.platform_tag = platform_from_name(entry.path());
        if options.checksums {
            artifact.sha256 = Some(sha256_file(entry.path())?);
        }
        artifacts.push(artifact);
    }
    artifacts.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    if !artifacts
        .iter()
        .any(|a| a.relative_path == options.entry_point)
    {
        warn!(
            "generate: entry point '{}' is not one of the scanned files; it must be registered in the launcher",
            options.entry_point
        );
    }

    let manifest = Manifest {
        source_base_uri: options.base_uri.clone(),
        entry_point: options.entry_point.clone(),
        version: options.version,
        launch_arguments: options.launch_arguments.clone(),
        artifacts,
    };
    manifest.validate()?;
    Ok(manifest)
}

/// Write `manifest` as `app.json` into `dir`.
pub fn write(manifest: &Manifest, dir: &Path) -> Result<PathBuf, String> {
    let path = dir.join(MANIFEST_FILE);
    std::fs::write(&path, manifest.to_json()?)
        .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    info!(
        "generate: wrote {} with {} artifacts",
        path.display(),
        manifest.artifacts.len()
    );
    Ok(path)
}

fn recognised(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        })
}

fn relative_path(root: &Path, path: &Path) -> Result<String, String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| format!("{} is outside {}", path.display(), root.display()))?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(segments.join("/"))
}

/// `native-linux.so` → `linux`, `gui-win.dll` → `windows`.
fn platform_from_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy().to_ascii_lowercase();
    let (_, suffix) = stem.rsplit_once('-')?;
    match suffix {
        "linux" | "mac" | "macos" | "osx" | "win" | "windows" => {
            Some(canonical_os(suffix).to_owned())
        }
        _ => None,
    }
}
