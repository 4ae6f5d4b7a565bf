use std::io::{self, BufRead, Write};

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use crate::engine::state::{EventReceiver, LauncherEvent};
use crate::util::format_bytes;

const BAR_TEMPLATE: &str = "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// Terminal presenter for `--headless`. Blocks the calling thread until the
/// engine hands off or stops sending.
pub fn run(mut events: EventReceiver) {
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = events.blocking_recv() {
        match event {
            LauncherEvent::Phase(phase) => info!("console: {phase}"),
            LauncherEvent::UpdateAvailable {
                artifacts,
                total_bytes,
                decision,
            } => {
                let summary = format!("{artifacts} files, {}", format_bytes(total_bytes));
                match decision {
                    Some(reply) => {
                        let accept = ask(&format!("Update available ({summary}). Download now?"));
                        if reply.send(accept).is_err() {
                            warn!("console: engine stopped waiting for an answer");
                        }
                    }
                    None => info!("console: downloading update ({summary})"),
                }
            }
            LauncherEvent::Progress(progress) => {
                let bar = bar.get_or_insert_with(|| new_bar(progress.total));
                bar.set_position(progress.written);
                if progress.ratio >= 1.0 {
                    bar.finish_and_clear();
                }
            }
            LauncherEvent::SyncFailed(failure) => {
                if let Some(bar) = bar.take() {
                    bar.abandon();
                }
                eprintln!("warning: {failure}");
                eprintln!("continuing with the installed files");
            }
            LauncherEvent::Failed(failure) => {
                if let Some(bar) = bar.take() {
                    bar.abandon();
                }
                eprintln!("{failure}");
                break;
            }
            LauncherEvent::ReadyToHandOff { version } => {
                info!("console: handing off to version {version}");
                break;
            }
        }
    }
}

fn new_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar.set_message("downloading");
    bar
}

fn ask(question: &str) -> bool {
    print!("{question} [Y/n] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => parse_answer(&line),
    }
}

/// Empty input accepts; anything but a yes declines.
fn parse_answer(line: &str) -> bool {
    matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "" | "y" | "yes"
    )
}
