//! Best-effort memory pressure check
//!
//! Resident memory of the current process is read through `sysinfo`. A
//! refresh walks process tables, so it runs on the blocking pool and at most
//! once per [`SAMPLE_INTERVAL`]; chunks in between reuse the last reading.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Pause applied when resident memory exceeds the limit
const PRESSURE_PAUSE: Duration = Duration::from_millis(100);

/// Minimum time between two process refreshes
const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Resident set size of process `pid` in bytes
///
/// # Arguments
/// * `system` - Reused `sysinfo` handle; only the one process is refreshed
/// * `pid` - Process to measure
///
/// # Returns
/// * `Option<u64>` - Resident bytes, or `None` when the platform does not report it
fn resident_bytes(system: &mut System, pid: Pid) -> Option<u64> {
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        false,
        ProcessRefreshKind::nothing().with_memory(),
    );
    system
        .process(pid)
        .map(|process| process.memory())
        .filter(|bytes| *bytes > 0)
}

#[derive(Debug, Default)]
struct Sample {
    taken_at: Option<Instant>,
    bytes: Option<u64>,
}

#[derive(Debug)]
struct ResidentReader {
    pid: Option<Pid>,
    system: Mutex<System>,
    last: Mutex<Sample>,
}

impl ResidentReader {
    fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Memory pressure checks disabled: {}", e);
                None
            }
        };
        Self {
            pid,
            system: Mutex::new(System::new()),
            last: Mutex::new(Sample::default()),
        }
    }

    /// Last reading if it is still fresh
    fn cached(&self, now: Instant) -> Option<Option<u64>> {
        let last = self.last.lock().ok()?;
        match last.taken_at {
            Some(at) if now.duration_since(at) < SAMPLE_INTERVAL => Some(last.bytes),
            _ => None,
        }
    }

    fn record(&self, now: Instant, bytes: Option<u64>) {
        if let Ok(mut last) = self.last.lock() {
            *last = Sample {
                taken_at: Some(now),
                bytes,
            };
        }
    }

    fn measure(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        resident_bytes(&mut system, pid)
    }
}

/// Pauses a transfer briefly while memory use is above a limit
///
/// Cloning shares the underlying reader, so every pipeline built from one
/// guard reuses the same rate-limited reading.
#[derive(Debug, Clone)]
pub struct MemoryGuard {
    limit_bytes: u64,
    reader: Arc<ResidentReader>,
}

impl MemoryGuard {
    /// Create a guard for the current process
    ///
    /// # Arguments
    /// * `limit_mb` - Resident size in MiB above which [`MemoryGuard::relieve`] pauses
    pub fn new(limit_mb: u64) -> Self {
        Self {
            limit_bytes: limit_mb.saturating_mul(1024 * 1024),
            reader: Arc::new(ResidentReader::new()),
        }
    }

    /// Current resident size in bytes, refreshed at most once per sample interval
    ///
    /// # Returns
    /// * `Option<u64>` - Resident bytes, or `None` when it cannot be measured
    pub async fn resident(&self) -> Option<u64> {
        let now = Instant::now();
        if let Some(bytes) = self.reader.cached(now) {
            return bytes;
        }

        let reader = Arc::clone(&self.reader);
        let bytes = match tokio::task::spawn_blocking(move || reader.measure()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Memory reading task failed: {}", e);
                None
            }
        };
        self.reader.record(now, bytes);
        bytes
    }

    /// Sleep once if over the limit
    ///
    /// # Returns
    /// * `bool` - Whether the call paused
    pub async fn relieve(&self) -> bool {
        match self.resident().await {
            Some(rss) if rss > self.limit_bytes => {
                debug!(
                    "Resident memory {} MiB over limit, pausing",
                    rss / (1024 * 1024)
                );
                tokio::time::sleep(PRESSURE_PAUSE).await;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generous_limit_never_pauses() {
        assert!(!MemoryGuard::new(u64::MAX / (1024 * 1024)).relieve().await);
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[tokio::test]
    async fn test_zero_limit_pauses() {
        let guard = MemoryGuard::new(0);
        assert!(guard.resident().await.is_some());
        assert!(guard.relieve().await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_resident_size_is_in_bytes() {
        // Any running tokio test process holds well over a mebibyte, whatever the page size.
        let bytes = MemoryGuard::new(0).resident().await.unwrap();
        assert!(bytes > 1024 * 1024, "resident size {bytes} looks like a page count");
    }

    #[tokio::test]
    async fn test_readings_are_reused_within_interval() {
        let guard = MemoryGuard::new(0);
        let first = guard.resident().await;
        let stamp = guard.reader.last.lock().unwrap().taken_at;
        let second = guard.resident().await;
        assert_eq!(first, second);
        assert_eq!(guard.reader.last.lock().unwrap().taken_at, stamp);
    }
}
