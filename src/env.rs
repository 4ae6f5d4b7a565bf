use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::models::Platform;
use crate::sync::IntegrityCheck;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Returns the installation root used when none is given on the command line.
pub fn default_install_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("XDG_DATA_HOME").map(PathBuf::from).or_else(|| {
            env::var_os("HOME")
                .map(PathBuf::from)
                .map(|home| home.join(".local").join("share"))
        }),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join(env!("CARGO_PKG_NAME"))
}

/// Settings for one launch cycle, resolved from the command line.
#[derive(Clone, Debug)]
pub struct LauncherConfig {
    pub install_root: PathBuf,
    /// Ask the operator before downloading an available update.
    pub confirm_updates: bool,
    pub integrity: IntegrityCheck,
    pub network_timeout: Duration,
    pub platform: Platform,
    /// Arguments given to the launcher itself, forwarded to the application.
    pub process_arguments: Vec<String>,
}

impl LauncherConfig {
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            confirm_updates: true,
            integrity: IntegrityCheck::default(),
            network_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            platform: Platform::current(),
            process_arguments: Vec::new(),
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self::new(default_install_dir())
    }
}
