//! Periodic trace flusher with a scoped working directory.
//!
//! Realtime trace sessions buffer events in the kernel; a periodic
//! manual flush bounds their latency. The flush target lives in a
//! private temp directory that is removed when the thread winds down,
//! whatever the exit path.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Counts flushes for observability and tests.
#[derive(Default)]
pub struct FlushStats {
    flushes: AtomicU64,
}

impl FlushStats {
    /// Number of flushes performed so far.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

/// Spawns the flush thread.
///
/// `period_ms` is read every cycle; 0 disables flushing until a session
/// requests a period again. The working directory is created inside the
/// thread and deleted when it returns.
pub fn spawn_flush_loop(
    period_ms: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    stats: Arc<FlushStats>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("trace-flush".into())
        .spawn(move || {
            let workdir = match tempfile::Builder::new().prefix("frametap-trace-").tempdir() {
                Ok(dir) => dir,
                Err(err) => {
                    tracing::warn!(%err, "trace flush working directory unavailable");
                    return;
                }
            };
            tracing::debug!(path = %workdir.path().display(), "trace flush loop started");

            let marker_path = workdir.path().join("flush.log");
            while !stop.load(Ordering::Relaxed) {
                let period = period_ms.load(Ordering::Relaxed);
                if period == 0 {
                    // flushing disabled; stay responsive to re-enable
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }

                let mut remaining = period as u64;
                while remaining > 0 && !stop.load(Ordering::Relaxed) {
                    let slice = remaining.min(50);
                    std::thread::sleep(Duration::from_millis(slice));
                    remaining -= slice;
                }
                if stop.load(Ordering::Relaxed) {
                    break;
                }

                match flush_once(&marker_path) {
                    Ok(()) => {
                        stats.flushes.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => tracing::warn!(%err, "trace flush failed"),
                }
            }
            tracing::debug!("trace flush loop stopped");
            // workdir drops here; the directory and its contents go away
        })
        .expect("spawn trace flush thread")
}

fn flush_once(marker_path: &std::path::Path) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(marker_path)?;
    writeln!(file, "{}", crate::telemetry::qpc_now())?;
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_loop_runs_and_stops() {
        let period = Arc::new(AtomicU32::new(10));
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(FlushStats::default());
        let handle = spawn_flush_loop(period.clone(), stop.clone(), stats.clone());

        std::thread::sleep(Duration::from_millis(80));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(stats.flushes() >= 2);
    }

    #[test]
    fn test_zero_period_disables_flushing() {
        let period = Arc::new(AtomicU32::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(FlushStats::default());
        let handle = spawn_flush_loop(period.clone(), stop.clone(), stats.clone());

        std::thread::sleep(Duration::from_millis(60));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert_eq!(stats.flushes(), 0);
    }
}
