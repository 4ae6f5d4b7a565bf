use std::collections::HashSet;
use std::env::consts;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// File name of the manifest document, both next to the remote artifacts and
/// in the local installation root.
pub const MANIFEST_FILE: &str = "app.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    pub relative_path: String,
    pub expected_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ArtifactDescriptor {
    pub fn new(relative_path: impl Into<String>, expected_size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            expected_size,
            platform_tag: None,
            sha256: None,
        }
    }

    #[must_use]
    pub fn with_platform(mut self, tag: impl Into<String>) -> Self {
        self.platform_tag = Some(tag.into());
        self
    }

    /// An artifact without a tag applies everywhere.
    pub fn applies_to(&self, platform: &Platform) -> bool {
        self.platform_tag
            .as_deref()
            .is_none_or(|tag| platform.matches(tag))
    }

    /// Location of this artifact under `root`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        self.relative_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(root.to_path_buf(), |path, segment| path.join(segment))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

impl FromStr for Version {
    type Err = String;

    /// Accepts `1`, `1.2`, `1.2.3` and an optional leading `v`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().trim_start_matches('v');
        let parts = normalized
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid version '{raw}': {e}"))?;
        match parts.as_slice() {
            [major] => Ok(Self::new(*major, 0, 0)),
            [major, minor] => Ok(Self::new(*major, *minor, 0)),
            [major, minor, build] => Ok(Self::new(*major, *minor, *build)),
            _ => Err(format!("invalid version '{raw}': expected major.minor.build")),
        }
    }
}

/// Versioned description of an application: where its artifacts live, which
/// of them it needs and how to start it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(rename = "sourceBaseURI")]
    pub source_base_uri: String,
    pub entry_point: String,
    #[serde(default)]
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_arguments: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactDescriptor>,
}

// Launch arguments take no part: a remote copy that differs only in them is
// not adopted.
impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.source_base_uri == other.source_base_uri
            && self.entry_point == other.entry_point
            && self.version == other.version
            && self.artifacts == other.artifacts
    }
}

impl Eq for Manifest {}

impl Manifest {
    pub fn from_json(raw: &str) -> Result<Self, String> {
        let manifest: Manifest =
            serde_json::from_str(raw).map_err(|e| format!("manifest parse error: {e}"))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("manifest encode error: {e}"))
    }

    /// Reject documents that would resolve outside the installation root or
    /// cannot be downloaded at all.
    pub fn validate(&self) -> Result<(), String> {
        if self.entry_point.trim().is_empty() {
            return Err("manifest has an empty entry point".into());
        }
        self.base_url()?;

        let mut seen = HashSet::new();
        for artifact in &self.artifacts {
            let path = artifact.relative_path.as_str();
            let escapes = path
                .split('/')
                .any(|segment| segment == ".." || segment.contains('\\'));
            if path.is_empty() || path.starts_with('/') || path.contains(':') || escapes {
                return Err(format!("artifact path '{path}' is not a plain relative path"));
            }
            // the installation root's copy of this file is the manifest cache
            if path.eq_ignore_ascii_case(MANIFEST_FILE) {
                return Err(format!("artifact path '{path}' is reserved for the manifest"));
            }
            if !seen.insert(path) {
                return Err(format!("artifact path '{path}' is listed twice"));
            }
        }
        Ok(())
    }

    /// Base URL with a trailing slash so relative paths append instead of
    /// replacing the last segment.
    pub fn base_url(&self) -> Result<Url, String> {
        let mut url = Url::parse(self.source_base_uri.trim())
            .map_err(|e| format!("invalid source URI '{}': {e}", self.source_base_uri))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn artifact_url(&self, artifact: &ArtifactDescriptor) -> Result<Url, String> {
        self.base_url()?
            .join(&artifact.relative_path)
            .map_err(|e| format!("cannot resolve '{}': {e}", artifact.relative_path))
    }

    pub fn remote_manifest_url(&self) -> Result<Url, String> {
        self.base_url()?
            .join(MANIFEST_FILE)
            .map_err(|e| format!("cannot resolve remote manifest: {e}"))
    }

    /// Artifacts that apply to `platform`, in manifest order.
    pub fn applicable<'a>(
        &'a self,
        platform: &'a Platform,
    ) -> impl Iterator<Item = &'a ArtifactDescriptor> + 'a {
        self.artifacts
            .iter()
            .filter(move |artifact| artifact.applies_to(platform))
    }
}

/// Operating system and architecture the launcher runs on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    pub fn current() -> Self {
        Self::new(consts::OS, consts::ARCH)
    }

    pub fn tag(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    /// A tag is either `os` or `os-arch`; `win` and `mac` are accepted as
    /// aliases for `windows` and `macos`.
    pub fn matches(&self, tag: &str) -> bool {
        let tag = tag.trim().to_ascii_lowercase();
        let (os, arch) = match tag.split_once('-') {
            Some((os, arch)) => (os, Some(arch)),
            None => (tag.as_str(), None),
        };
        canonical_os(os) == self.os && arch.is_none_or(|arch| arch == self.arch)
    }
}

pub fn canonical_os(os: &str) -> &str {
    match os {
        "win" | "win32" | "win64" => "windows",
        "mac" | "osx" | "darwin" => "macos",
        other => other,
    }
}
