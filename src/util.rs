use std::sync::Arc;

use log::{error, warn};
use tokio::runtime::{Builder, Runtime};

/// Render a byte count the way the progress label shows it.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;

    let value = bytes as f64;
    if value < KIB {
        format!("{bytes} B")
    } else if value < MIB {
        format!("{:.1} KB", value / KIB)
    } else {
        format!("{:.1} MB", value / MIB)
    }
}

/// Fraction of `total` already written, clamped to [0, 1].
#[must_use]
pub fn progress_ratio(written: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (written as f64 / total as f64).clamp(0.0, 1.0)
}

/// Multi-threaded runtime for the background sequence, or a single-threaded
/// one when the platform refuses to give us worker threads.
pub fn build_runtime() -> Result<Arc<Runtime>, String> {
    match Runtime::new() {
        Ok(rt) => Ok(Arc::new(rt)),
        Err(err) => {
            warn!(
                "runtime: failed to create multithreaded runtime ({}); trying single-threaded runtime",
                err
            );
            Builder::new_current_thread()
                .enable_all()
                .build()
                .map(Arc::new)
                .map_err(|fallback_err| {
                    error!("runtime: failed to create any Tokio runtime ({fallback_err})");
                    format!("unable to start background runtime: {fallback_err}")
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bytes_human_readable() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2_048), "2.0 KB");
        assert_eq!(format_bytes(5_242_880), "5.0 MB");
    }

    #[test]
    fn calculates_progress_ratio() {
        assert_eq!(progress_ratio(0, 10), 0.0);
        assert_eq!(progress_ratio(5, 10), 0.5);
        assert_eq!(progress_ratio(10, 10), 1.0);
        assert_eq!(progress_ratio(15, 10), 1.0);
        assert_eq!(progress_ratio(5, 0), 0.0);
    }
}
