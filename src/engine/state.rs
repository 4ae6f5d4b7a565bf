use std::fmt;

use tokio::sync::{mpsc, oneshot};

use crate::engine::models::Version;
use crate::error::LaunchFailure;

// Named steps of one launch cycle; attached to every error report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    ResolveManifest,
    PlanSync,
    SkipSync,
    SyncFiles,
    ComposeApplication,
    InitApplication,
    StartApplication,
    StopApplication,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::ResolveManifest => "Update Manifest",
            Phase::PlanSync => "Update Check",
            Phase::SkipSync => "Skip Update",
            Phase::SyncFiles => "File Synchronization",
            Phase::ComposeApplication => "Create Application",
            Phase::InitApplication => "Application Init",
            Phase::StartApplication => "Application Start",
            Phase::StopApplication => "Application Stop",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cumulative download progress across a whole sync plan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncProgress {
    pub written: u64,
    pub total: u64,
    pub ratio: f64,
}

// Everything the background sequence tells the presentation side.
#[derive(Debug)]
pub enum LauncherEvent {
    Phase(Phase),
    /// The plan is non-empty. When `decision` is present the engine waits for
    /// an answer; dropping the sender counts as "no".
    UpdateAvailable {
        artifacts: usize,
        total_bytes: u64,
        decision: Option<oneshot::Sender<bool>>,
    },
    Progress(SyncProgress),
    /// The sync step failed; the launch continues with what is on disk.
    SyncFailed(LaunchFailure),
    /// Terminal failure; nothing else follows.
    Failed(LaunchFailure),
    /// Presentation must release its window; the application takes over.
    ReadyToHandOff { version: Version },
}

pub type EventSender = mpsc::UnboundedSender<LauncherEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<LauncherEvent>;
