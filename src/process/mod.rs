use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use log::{debug, info, warn};

use crate::launch::{LaunchContext, Launchable};

/// Variable a child reads to find every artifact it was composed with.
pub const ARTIFACT_PATH_VAR: &str = "UPDRAFT_ARTIFACT_PATH";

/// Runs an executable artifact as a child process that only sees the
/// artifacts of its launch context.
pub struct ProcessLaunchable {
    program: PathBuf,
    install_root: PathBuf,
    artifacts: Vec<PathBuf>,
    child: Option<Child>,
}

impl ProcessLaunchable {
    pub fn new(context: &LaunchContext, program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            install_root: context.install_root.clone(),
            artifacts: context.paths().map(Path::to_path_buf).collect(),
            child: None,
        }
    }

    fn command(&self, arguments: &[String]) -> Result<Command, String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(arguments);
        cmd.current_dir(&self.install_root);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let var = library_path_var();
        let search_path = library_search_path(&self.artifacts, env::var_os(var))?;
        debug!("launch: {var}={}", search_path.to_string_lossy());
        cmd.env(var, search_path);

        let artifact_path = env::join_paths(&self.artifacts)
            .map_err(|e| format!("artifact path cannot be joined: {e}"))?;
        cmd.env(ARTIFACT_PATH_VAR, artifact_path);
        Ok(cmd)
    }
}

impl Launchable for ProcessLaunchable {
    fn init(&mut self) -> Result<(), String> {
        if !self.program.is_file() {
            return Err(format!("program not found at {}", self.program.display()));
        }
        ensure_executable(&self.program)
    }

    fn start(
        &mut self,
        launch_arguments: Option<&str>,
        process_arguments: &[String],
    ) -> Result<(), String> {
        let arguments = compose_arguments(launch_arguments, process_arguments)?;
        info!(
            "launch: starting {} with {} arguments",
            self.program.display(),
            arguments.len()
        );
        let child = self
            .command(&arguments)?
            .spawn()
            .map_err(|e| format!("failed to start {}: {e}", self.program.display()))?;
        info!("launch: process {} started", child.id());
        self.child = Some(child);
        Ok(())
    }

    /// A non-zero exit is a failure of the application.
    fn wait(&mut self) -> Result<(), String> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| format!("failed to wait for application: {e}"))?;
        if !status.success() {
            return Err(format!("application exited with {status}"));
        }
        info!("launch: application exited normally");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), String> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                warn!("launch: application still running; killing {}", child.id());
                child
                    .kill()
                    .map_err(|e| format!("failed to stop application: {e}"))?;
                if let Ok(status) = child.wait() {
                    debug!("launch: application stopped with {status}");
                }
                Ok(())
            }
            Err(e) => Err(format!("failed to query application state: {e}")),
        }
    }
}

/// Manifest launch arguments first, then whatever the launcher was given.
pub fn compose_arguments(
    launch_arguments: Option<&str>,
    process_arguments: &[String],
) -> Result<Vec<String>, String> {
    let mut arguments = match launch_arguments.map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            shlex::split(raw).ok_or_else(|| format!("malformed launch arguments: {raw}"))?
        }
        _ => Vec::new(),
    };
    arguments.extend(process_arguments.iter().cloned());
    Ok(arguments)
}

pub fn library_path_var() -> &'static str {
    if cfg!(target_os = "windows") {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// Directories holding the artifacts, in manifest order without repeats.
/// On Windows the inherited `PATH` is kept after them so system DLLs resolve.
fn library_search_path(
    artifacts: &[PathBuf],
    inherited: Option<OsString>,
) -> Result<OsString, String> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for dir in artifacts.iter().filter_map(|p| p.parent()) {
        if !dirs.iter().any(|known| known == dir) {
            dirs.push(dir.to_path_buf());
        }
    }
    if cfg!(target_os = "windows") {
        if let Some(inherited) = inherited {
            dirs.extend(env::split_paths(&inherited));
        }
    }
    env::join_paths(dirs).map_err(|e| format!("library path cannot be joined: {e}"))
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;

    let metadata =
        std::fs::metadata(path).map_err(|e| format!("cannot stat {}: {e}", path.display()))?;
    let mut permissions = metadata.permissions();
    if permissions.mode() & 0o111 == 0 {
        debug!("launch: marking {} executable", path.display());
        permissions.set_mode(permissions.mode() | 0o755);
        std::fs::set_permissions(path, permissions)
            .map_err(|e| format!("cannot mark {} executable: {e}", path.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) -> Result<(), String> {
    Ok(())
}
