use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::engine::models::{Manifest, Platform};
use crate::error::LaunchError;
use crate::process::ProcessLaunchable;

/// Lifecycle of the application the launcher hands off to.
pub trait Launchable: Send {
    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// `launch_arguments` comes from the manifest, `process_arguments` are
    /// the arguments the launcher itself was started with.
    fn start(
        &mut self,
        launch_arguments: Option<&str>,
        process_arguments: &[String],
    ) -> Result<(), String>;

    /// Block until the application is done.
    fn wait(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextEntry {
    pub relative_path: String,
    pub path: PathBuf,
}

/// The artifacts an application is allowed to see: every artifact of the
/// manifest that applies to this platform, nothing from the launcher.
#[derive(Clone, Debug)]
pub struct LaunchContext {
    pub install_root: PathBuf,
    pub entry_point: String,
    pub entries: Vec<ContextEntry>,
}

impl LaunchContext {
    pub fn artifact(&self, relative_path: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|entry| entry.relative_path == relative_path)
            .map(|entry| entry.path.as_path())
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|entry| entry.path.as_path())
    }
}

pub type LaunchableFactory =
    Box<dyn Fn(&LaunchContext) -> Result<Box<dyn Launchable>, String> + Send + Sync>;

/// Maps entry point identifiers to constructors. Identifiers without a
/// registration are looked up as executable artifacts of the context.
#[derive(Default)]
pub struct EntryPointRegistry {
    factories: HashMap<String, LaunchableFactory>,
}

impl EntryPointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn register<F>(&mut self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn(&LaunchContext) -> Result<Box<dyn Launchable>, String> + Send + Sync + 'static,
    {
        self.factories.insert(entry_point.into(), Box::new(factory));
    }

    pub fn resolve(&self, context: &LaunchContext) -> Result<Box<dyn Launchable>, LaunchError> {
        let entry_point = context.entry_point.as_str();
        if let Some(factory) = self.factories.get(entry_point) {
            debug!("launch: using registered factory for '{entry_point}'");
            return factory(context).map_err(|cause| LaunchError::Construction {
                entry_point: entry_point.to_owned(),
                cause,
            });
        }

        let program = context
            .artifact(entry_point)
            .ok_or_else(|| LaunchError::EntryPointNotFound(entry_point.to_owned()))?;
        if !program.is_file() {
            return Err(LaunchError::MissingArtifact(program.to_path_buf()));
        }
        debug!("launch: '{entry_point}' runs as a child process");
        Ok(Box::new(ProcessLaunchable::new(context, program)))
    }
}

/// An entry point resolved against its context, ready for `init`.
pub struct ComposedApplication {
    pub context: LaunchContext,
    pub launchable: Box<dyn Launchable>,
}

pub struct LaunchComposer {
    registry: EntryPointRegistry,
    platform: Platform,
}

impl LaunchComposer {
    pub fn new(registry: EntryPointRegistry, platform: Platform) -> Self {
        Self { registry, platform }
    }

    /// Build the context from the applicable artifacts (whether or not they
    /// were downloaded this cycle) and resolve the entry point in it.
    pub fn compose(
        &self,
        manifest: &Manifest,
        install_root: &Path,
    ) -> Result<ComposedApplication, LaunchError> {
        let entries: Vec<ContextEntry> = manifest
            .applicable(&self.platform)
            .map(|artifact| ContextEntry {
                relative_path: artifact.relative_path.clone(),
                path: artifact.local_path(install_root),
            })
            .collect();
        for entry in entries.iter().filter(|entry| !entry.path.is_file()) {
            warn!(
                "launch: {} is not on disk; the application may fail to load it",
                entry.relative_path
            );
        }

        let context = LaunchContext {
            install_root: install_root.to_path_buf(),
            entry_point: manifest.entry_point.clone(),
            entries,
        };
        let launchable = self.registry.resolve(&context)?;
        info!(
            "launch: composed '{}' with {} artifacts",
            context.entry_point,
            context.entries.len()
        );
        Ok(ComposedApplication {
            context,
            launchable,
        })
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every lifecycle call; can be told to fail one of them.
    #[derive(Clone, Default)]
    pub struct RecordingLaunchable {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub fail_on: Option<&'static str>,
    }

    impl RecordingLaunchable {
        fn record(&self, call: String, name: &str) -> Result<(), String> {
            self.calls.lock().unwrap().push(call);
            if self.fail_on == Some(name) {
                return Err(format!("{name} exploded"));
            }
            Ok(())
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Launchable for RecordingLaunchable {
        fn init(&mut self) -> Result<(), String> {
            self.record("init".into(), "init")
        }

        fn start(
            &mut self,
            launch_arguments: Option<&str>,
            process_arguments: &[String],
        ) -> Result<(), String> {
            let call = format!(
                "start {} | {}",
                launch_arguments.unwrap_or(""),
                process_arguments.join(" ")
            );
            self.record(call, "start")
        }

        fn wait(&mut self) -> Result<(), String> {
            self.record("wait".into(), "wait")
        }

        fn stop(&mut self) -> Result<(), String> {
            self.record("stop".into(), "stop")
        }
    }
}
