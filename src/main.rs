use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use tokio::sync::mpsc;

mod engine;
mod env;
mod error;
mod launch;
mod manifest;
mod networking;
mod process;
mod storage;
mod sync;
mod ui;
mod util;

use crate::engine::LauncherEngine;
use crate::engine::models::Version;
use crate::env::{DEFAULT_TIMEOUT_SECS, LauncherConfig};
use crate::launch::{EntryPointRegistry, LaunchComposer};
use crate::manifest::EMBEDDED_MANIFEST;
use crate::manifest::generate::{self, GenerateOptions};
use crate::networking::{ArtifactSource, NetworkClient};
use crate::sync::IntegrityCheck;

#[derive(Parser, Debug)]
#[command(
    name = "Updraft",
    author,
    version,
    about = "Keeps an application's files in sync with a remote manifest, then launches it"
)]
struct Cli {
    /// Print launcher version and exit without starting the UI.
    #[arg(long)]
    version_only: bool,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    launch: LaunchArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Describe the files of an application directory in a new app.json.
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct LaunchArgs {
    /// Installation root; defaults to the per-user data directory.
    #[arg(long, value_name = "DIR")]
    install_dir: Option<PathBuf>,

    /// Report progress on the terminal instead of opening a window.
    #[arg(long)]
    headless: bool,

    /// Download available updates without asking.
    #[arg(long)]
    yes: bool,

    /// Compare SHA-256 digests of installed files when the manifest has them.
    #[arg(long)]
    verify_checksums: bool,

    /// Connect and read timeout for remote sources.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Use this manifest file instead of the built-in baseline.
    #[arg(long, value_name = "FILE")]
    baseline: Option<PathBuf>,

    /// Arguments forwarded to the application.
    #[arg(last = true, value_name = "APP_ARGS")]
    app_args: Vec<String>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// URL the artifacts will be served from.
    #[arg(long)]
    base_uri: String,

    /// Entry point identifier, usually the relative path of the executable.
    #[arg(long)]
    entry_point: String,

    /// Application directory to scan; app.json is written here.
    #[arg(long, value_name = "DIR")]
    dir: PathBuf,

    #[arg(long, default_value = "1.0.0")]
    version: Version,

    /// Launch arguments recorded in the manifest.
    #[arg(long, allow_hyphen_values = true)]
    arguments: Option<String>,

    /// Only include files with this extension (repeatable).
    #[arg(long = "extension", value_name = "EXT")]
    extensions: Vec<String>,

    /// Record a SHA-256 digest for every artifact.
    #[arg(long)]
    checksums: bool,
}

impl LaunchArgs {
    fn config(&self) -> LauncherConfig {
        let mut config = match &self.install_dir {
            Some(dir) => LauncherConfig::new(dir),
            None => LauncherConfig::default(),
        };
        config.confirm_updates = !self.yes;
        config.integrity = if self.verify_checksums {
            IntegrityCheck::Checksum
        } else {
            IntegrityCheck::Size
        };
        config.network_timeout = Duration::from_secs(self.timeout_secs);
        config.process_arguments = self.app_args.clone();
        config
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.version_only {
        println!("Updraft {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let outcome = match cli.command {
        Some(Command::Generate(args)) => run_generate(args),
        None => run_launch(&cli.launch),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<(), String> {
    let options = GenerateOptions {
        base_uri: args.base_uri,
        entry_point: args.entry_point,
        app_dir: args.dir,
        version: args.version,
        launch_arguments: args.arguments,
        extensions: args.extensions,
        checksums: args.checksums,
    };
    let manifest = generate::create(&options)?;
    let path = generate::write(&manifest, &options.app_dir)?;
    println!("{}", path.display());
    Ok(())
}

fn run_launch(args: &LaunchArgs) -> Result<(), String> {
    let config = args.config();
    let baseline = match &args.baseline {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read baseline {}: {e}", path.display()))?,
        None => EMBEDDED_MANIFEST.to_owned(),
    };

    let runtime = util::build_runtime()?;
    let source: Arc<dyn ArtifactSource> = Arc::new(NetworkClient::new(config.network_timeout));
    let composer = LaunchComposer::new(EntryPointRegistry::new(), config.platform.clone());
    let mut engine = LauncherEngine::new(config, source, baseline, composer);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    // The sender lives in the task; the presenter sees a closed channel
    // once the engine is done.
    let task = runtime.spawn(async move { engine.run(&events_tx).await });

    if args.headless {
        ui::console::run(events_rx);
    } else if let Err(err) = ui::LauncherWindow::run(events_rx) {
        warn!("{err}; continuing without a window");
    }

    let prepared = runtime
        .block_on(task)
        .map_err(|e| format!("launch task aborted: {e}"))?
        .map_err(|failure| failure.to_string())?;
    info!("main: launcher window released");
    prepared.hand_off().map_err(|failure| failure.to_string())
}
