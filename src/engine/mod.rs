use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::oneshot;

use crate::engine::models::Version;
use crate::engine::state::{EventSender, LauncherEvent, Phase};
use crate::env::LauncherConfig;
use crate::error::LaunchFailure;
use crate::launch::{ComposedApplication, LaunchComposer};
use crate::manifest::{ManifestResolver, ResolvedManifest};
use crate::networking::ArtifactSource;
use crate::storage::StorageManager;
use crate::sync::{self, SyncExecutor, SyncPlan, SyncReport};

pub mod models;
pub mod state;

/// Everything one launch cycle has learned so far. Owned by the background
/// task; the presentation side only sees events.
#[derive(Debug)]
pub struct LaunchCycle {
    pub phase: Phase,
    pub manifest: Option<ResolvedManifest>,
    pub plan: SyncPlan,
    pub report: Option<SyncReport>,
}

impl Default for LaunchCycle {
    fn default() -> Self {
        Self {
            phase: Phase::ResolveManifest,
            manifest: None,
            plan: SyncPlan::default(),
            report: None,
        }
    }
}

/// An initialised application waiting for the presenter to let go.
pub struct PreparedLaunch {
    pub application: ComposedApplication,
    pub version: Version,
    pub launch_arguments: Option<String>,
    pub process_arguments: Vec<String>,
}

impl PreparedLaunch {
    /// Start the application, block until it finishes, then stop it.
    /// Runs on the main thread once the launcher window is gone.
    pub fn hand_off(mut self) -> Result<(), LaunchFailure> {
        let launchable = &mut self.application.launchable;
        info!("engine: handing off to '{}'", self.application.context.entry_point);

        let started = launchable
            .start(self.launch_arguments.as_deref(), &self.process_arguments)
            .and_then(|()| launchable.wait())
            .map_err(|cause| LaunchFailure::new(Phase::StartApplication, cause));
        let stopped = launchable
            .stop()
            .map_err(|cause| LaunchFailure::new(Phase::StopApplication, cause));

        if let Err(failure) = &started {
            error!("engine: {failure}");
        }
        if let Err(failure) = &stopped {
            error!("engine: {failure}");
        }
        started.and(stopped)
    }
}

pub struct LauncherEngine {
    config: LauncherConfig,
    storage: StorageManager,
    source: Arc<dyn ArtifactSource>,
    embedded: String,
    composer: LaunchComposer,
    pub cycle: LaunchCycle,
}

impl LauncherEngine {
    pub fn new(
        config: LauncherConfig,
        source: Arc<dyn ArtifactSource>,
        embedded: impl Into<String>,
        composer: LaunchComposer,
    ) -> Self {
        let storage = StorageManager::new(config.install_root.clone());
        Self {
            config,
            storage,
            source,
            embedded: embedded.into(),
            composer,
            cycle: LaunchCycle::default(),
        }
    }

    /// Resolve, plan, sync, compose and initialise. A failure is sent as
    /// `Failed` before it is returned; success ends with `ReadyToHandOff`.
    pub async fn run(&mut self, events: &EventSender) -> Result<PreparedLaunch, LaunchFailure> {
        info!(
            "engine: starting launch cycle for {} in {}",
            self.config.platform.tag(),
            self.config.install_root.display()
        );
        match self.prepare(events).await {
            Ok(prepared) => {
                if let Some(resolved) = &self.cycle.manifest {
                    info!(
                        "engine: {} manifest {} ready, {} planned, {} downloaded",
                        resolved.origin,
                        resolved.manifest.version,
                        self.cycle.plan.len(),
                        self.cycle.report.map_or(0, |report| report.artifacts)
                    );
                }
                events
                    .send(LauncherEvent::ReadyToHandOff {
                        version: prepared.version,
                    })
                    .ok();
                Ok(prepared)
            }
            Err(failure) => {
                error!("engine: {failure} (stopped in {})", self.cycle.phase);
                events.send(LauncherEvent::Failed(failure.clone())).ok();
                Err(failure)
            }
        }
    }

    async fn prepare(&mut self, events: &EventSender) -> Result<PreparedLaunch, LaunchFailure> {
        self.enter(Phase::ResolveManifest, events);
        let resolved = ManifestResolver::new(&self.embedded, &self.storage, self.source.as_ref())
            .resolve()
            .await
            .map_err(|cause| LaunchFailure::new(Phase::ResolveManifest, cause))?;
        info!(
            "engine: using {} manifest {}",
            resolved.origin, resolved.manifest.version
        );
        let manifest = resolved.manifest.clone();
        self.cycle.manifest = Some(resolved);

        self.enter(Phase::PlanSync, events);
        let plan = sync::plan_blocking(
            manifest.clone(),
            self.config.install_root.clone(),
            self.config.platform.clone(),
            self.config.integrity,
        )
        .await
        .map_err(|cause| LaunchFailure::new(Phase::PlanSync, cause))?;
        debug!("engine: planned {:?}", plan.paths());
        self.cycle.plan = plan.clone();

        if plan.is_empty() {
            info!("engine: installation is up to date");
            self.enter(Phase::SkipSync, events);
        } else if !self.confirm(&plan, events).await {
            info!("engine: update declined, launching what is installed");
            self.enter(Phase::SkipSync, events);
        } else {
            self.enter(Phase::SyncFiles, events);
            let executor = SyncExecutor::new(self.source.as_ref(), &self.config.install_root);
            let outcome = executor
                .execute(&manifest, &plan, |progress| {
                    events.send(LauncherEvent::Progress(progress)).ok();
                })
                .await;
            match outcome {
                Ok(report) => {
                    info!(
                        "engine: synchronized {} artifacts ({} bytes)",
                        report.artifacts, report.bytes
                    );
                    self.cycle.report = Some(report);
                }
                Err(err) => {
                    let failure = LaunchFailure::new(Phase::SyncFiles, err);
                    warn!("engine: {failure}; continuing with installed files");
                    events.send(LauncherEvent::SyncFailed(failure)).ok();
                }
            }
        }

        self.enter(Phase::ComposeApplication, events);
        let mut application = self
            .composer
            .compose(&manifest, &self.config.install_root)
            .map_err(|err| LaunchFailure::new(Phase::ComposeApplication, err))?;

        self.enter(Phase::InitApplication, events);
        application
            .launchable
            .init()
            .map_err(|cause| LaunchFailure::new(Phase::InitApplication, cause))?;

        Ok(PreparedLaunch {
            application,
            version: manifest.version,
            launch_arguments: manifest.launch_arguments.clone(),
            process_arguments: self.config.process_arguments.clone(),
        })
    }

    fn enter(&mut self, phase: Phase, events: &EventSender) {
        info!("engine: phase {phase}");
        self.cycle.phase = phase;
        events.send(LauncherEvent::Phase(phase)).ok();
    }

    /// Announce the update and, when configured, wait for the operator.
    async fn confirm(&self, plan: &SyncPlan, events: &EventSender) -> bool {
        if !self.config.confirm_updates {
            events
                .send(LauncherEvent::UpdateAvailable {
                    artifacts: plan.len(),
                    total_bytes: plan.total_bytes(),
                    decision: None,
                })
                .ok();
            return true;
        }

        let (reply, answer) = oneshot::channel();
        let sent = events.send(LauncherEvent::UpdateAvailable {
            artifacts: plan.len(),
            total_bytes: plan.total_bytes(),
            decision: Some(reply),
        });
        if sent.is_err() {
            warn!("engine: nobody to ask about the update; skipping it");
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::{ArtifactDescriptor, Manifest, Platform};
    use crate::engine::state::EventReceiver;
    use crate::launch::EntryPointRegistry;
    use crate::launch::testing::RecordingLaunchable;
    use crate::manifest::ManifestOrigin;
    use crate::networking::testing::MemorySource;
    use tokio::sync::mpsc;

    const BASE: &str = "mem://mirror/app/";
    const ENTRY: &str = "demo.App";

    fn manifest() -> Manifest {
        Manifest {
            source_base_uri: BASE.into(),
            entry_point: ENTRY.into(),
            version: Version::new(1, 2, 3),
            launch_arguments: Some("--profile default".into()),
            artifacts: vec![
                ArtifactDescriptor::new("lib/a.lib", 10),
                ArtifactDescriptor::new("lib/b.lib", 20),
                ArtifactDescriptor::new("lib/gui.dll", 30).with_platform("windows"),
            ],
        }
    }

    fn full_source() -> MemorySource {
        MemorySource::new()
            .with_artifact(&format!("{BASE}lib/a.lib"), vec![1u8; 10])
            .with_artifact(&format!("{BASE}lib/b.lib"), vec![2u8; 20])
    }

    fn config(root: &std::path::Path, confirm: bool) -> LauncherConfig {
        let mut config = LauncherConfig::new(root);
        config.confirm_updates = confirm;
        config.platform = Platform::new("linux", "x86_64");
        config.process_arguments = vec!["--from-cli".into()];
        config
    }

    fn engine(
        config: LauncherConfig,
        source: Arc<dyn ArtifactSource>,
        app: &RecordingLaunchable,
    ) -> LauncherEngine {
        let mut registry = EntryPointRegistry::new();
        let app = app.clone();
        registry.register(ENTRY, move |_| Ok(Box::new(app.clone())));
        let composer = LaunchComposer::new(registry, config.platform.clone());
        LauncherEngine::new(config, source, manifest().to_json().unwrap(), composer)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<LauncherEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn phases(events: &[LauncherEvent]) -> Vec<Phase> {
        events
            .iter()
            .filter_map(|event| match event {
                LauncherEvent::Phase(phase) => Some(*phase),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn second_run_with_unreachable_remote_downloads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(full_source());
        let app = RecordingLaunchable::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let prepared = engine(config(dir.path(), false), source.clone(), &app)
            .run(&tx)
            .await
            .unwrap();
        assert_eq!(prepared.version, Version::new(1, 2, 3));
        assert_eq!(source.opened().len(), 2);
        let first = drain(&mut rx);
        assert!(phases(&first).contains(&Phase::SyncFiles));
        assert!(!dir.path().join("lib").join("gui.dll").exists());

        let mut second = engine(config(dir.path(), false), source.clone(), &app);
        second.run(&tx).await.unwrap();
        assert_eq!(source.opened().len(), 2);
        assert!(second.cycle.plan.is_empty());
        assert_eq!(
            phases(&drain(&mut rx)),
            vec![
                Phase::ResolveManifest,
                Phase::PlanSync,
                Phase::SkipSync,
                Phase::ComposeApplication,
                Phase::InitApplication,
            ]
        );
    }

    #[tokio::test]
    async fn declined_update_skips_sync_and_still_launches() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(full_source());
        let app = RecordingLaunchable::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let operator = async {
            while let Some(event) = rx.recv().await {
                match event {
                    LauncherEvent::UpdateAvailable {
                        artifacts,
                        total_bytes,
                        decision,
                    } => {
                        assert_eq!((artifacts, total_bytes), (2, 30));
                        decision.unwrap().send(false).unwrap();
                    }
                    LauncherEvent::ReadyToHandOff { .. } | LauncherEvent::Failed(_) => break,
                    _ => {}
                }
            }
        };
        let mut engine = engine(config(dir.path(), true), source.clone(), &app);
        let (result, ()) = tokio::join!(engine.run(&tx), operator);

        assert!(result.is_ok());
        assert!(source.opened().is_empty());
        assert_eq!(engine.cycle.phase, Phase::InitApplication);
        assert!(engine.cycle.report.is_none());
        assert_eq!(app.calls(), vec!["init"]);
    }

    #[tokio::test]
    async fn dropped_responder_counts_as_decline() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(full_source());
        let app = RecordingLaunchable::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let operator = async {
            while let Some(event) = rx.recv().await {
                match event {
                    LauncherEvent::UpdateAvailable { decision, .. } => drop(decision),
                    LauncherEvent::ReadyToHandOff { .. } | LauncherEvent::Failed(_) => break,
                    _ => {}
                }
            }
        };
        let mut engine = engine(config(dir.path(), true), source.clone(), &app);
        let (result, ()) = tokio::join!(engine.run(&tx), operator);
        assert!(result.is_ok());
        assert!(source.opened().is_empty());
    }

    #[tokio::test]
    async fn sync_failure_is_reported_and_launch_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        // b.lib is not served
        let source = Arc::new(
            MemorySource::new().with_artifact(&format!("{BASE}lib/a.lib"), vec![1u8; 10]),
        );
        let app = RecordingLaunchable::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = engine(config(dir.path(), false), source, &app).run(&tx).await;
        assert!(result.is_ok());

        let events = drain(&mut rx);
        let failure = events.iter().find_map(|event| match event {
            LauncherEvent::SyncFailed(failure) => Some(failure),
            _ => None,
        });
        let failure = failure.expect("sync failure reported");
        assert_eq!(failure.phase, Phase::SyncFiles);
        assert!(failure.cause.contains("lib/b.lib"));
        assert!(matches!(events.last(), Some(LauncherEvent::ReadyToHandOff { .. })));
        assert!(!events.iter().any(|e| matches!(e, LauncherEvent::Failed(_))));
    }

    #[tokio::test]
    async fn remote_artifact_named_like_the_cache_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut hostile = manifest();
        hostile.version = Version::new(9, 0, 0);
        hostile.artifacts.push(ArtifactDescriptor::new("app.json", 5));
        let source = Arc::new(
            full_source()
                .with_document(&format!("{BASE}app.json"), hostile.to_json().unwrap())
                .with_artifact(&format!("{BASE}app.json"), b"hello".to_vec()),
        );
        let app = RecordingLaunchable::default();
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut engine = engine(config(dir.path(), false), source, &app);
        let prepared = engine.run(&tx).await.unwrap();

        assert_eq!(prepared.version, Version::new(1, 2, 3));
        let resolved = engine.cycle.manifest.as_ref().unwrap();
        assert_eq!(resolved.origin, ManifestOrigin::Embedded);
        assert!(!engine.cycle.plan.paths().contains(&"app.json"));
        assert!(!dir.path().join("app.json").exists());
    }

    #[tokio::test]
    async fn unknown_entry_point_fails_composition() {
        let dir = tempfile::tempdir().unwrap();
        let source: Arc<dyn ArtifactSource> = Arc::new(full_source());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = config(dir.path(), false);
        let composer = LaunchComposer::new(EntryPointRegistry::new(), config.platform.clone());
        let mut engine =
            LauncherEngine::new(config, source, manifest().to_json().unwrap(), composer);

        let failure = engine.run(&tx).await.err().unwrap();
        assert_eq!(failure.phase, Phase::ComposeApplication);
        assert!(failure.to_string().starts_with("Error during Create Application phase"));
        assert!(matches!(
            drain(&mut rx).last(),
            Some(LauncherEvent::Failed(f)) if f.phase == Phase::ComposeApplication
        ));
    }

    #[tokio::test]
    async fn init_failure_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let app = RecordingLaunchable {
            fail_on: Some("init"),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let failure = engine(config(dir.path(), false), Arc::new(full_source()), &app)
            .run(&tx)
            .await
            .err()
            .unwrap();
        assert_eq!(failure.phase, Phase::InitApplication);
        assert_eq!(failure.cause, "init exploded");
    }

    #[tokio::test]
    async fn hand_off_forwards_arguments_and_always_stops() {
        let dir = tempfile::tempdir().unwrap();
        let app = RecordingLaunchable::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let prepared = engine(config(dir.path(), false), Arc::new(full_source()), &app)
            .run(&tx)
            .await
            .unwrap();

        prepared.hand_off().unwrap();
        assert_eq!(
            app.calls(),
            vec!["init", "start --profile default | --from-cli", "wait", "stop"]
        );

        let failing = RecordingLaunchable {
            fail_on: Some("start"),
            ..Default::default()
        };
        let prepared = engine(config(dir.path(), false), Arc::new(full_source()), &failing)
            .run(&tx)
            .await
            .unwrap();
        let failure = prepared.hand_off().unwrap_err();
        assert_eq!(failure.phase, Phase::StartApplication);
        assert_eq!(failing.calls().last().map(String::as_str), Some("stop"));
    }

    #[tokio::test]
    async fn failed_wait_fails_the_hand_off() {
        let dir = tempfile::tempdir().unwrap();
        let crashing = RecordingLaunchable {
            fail_on: Some("wait"),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let prepared = engine(config(dir.path(), false), Arc::new(full_source()), &crashing)
            .run(&tx)
            .await
            .unwrap();

        let failure = prepared.hand_off().unwrap_err();
        assert_eq!(failure.phase, Phase::StartApplication);
        assert_eq!(failure.cause, "wait exploded");
        assert_eq!(crashing.calls().last().map(String::as_str), Some("stop"));
    }
}
