//! Heap snapshot capture.
//!
//! A [`SnapshotController`] owns one worker task. Manual requests, the
//! `SIGUSR2` signal and the optional periodic timer all funnel into that
//! worker, which is the only place snapshot files are named and written.
//!
//! ```text
//! snapshot(trigger) ──► inbox ─┐
//! SIGUSR2 ─────────────────────┼──► worker ──► SnapshotWriter ──► <dir>/heapdump-*.heapsnapshot
//! interval tick ───────────────┘
//! ```

pub mod memory;
pub mod snapshot;

pub use memory::{AllocatorStats, MemoryUsage, TrackingAllocator};
pub use snapshot::{snapshot_file_name, HeapSnapshot, SnapshotTrigger, SnapshotWriter};

use crate::config::HeapDumpConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum HeapDumpError {
    #[error("Failed to create heapdump directory '{path}': {source}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write heap snapshot '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize heap snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type HeapDumpResult<T> = Result<T, HeapDumpError>;

const INBOX_CAPACITY: usize = 16;

struct SnapshotRequest {
    trigger: SnapshotTrigger,
    reply: oneshot::Sender<Option<PathBuf>>,
}

/// Handle to the snapshot worker.
///
/// A disabled controller has no worker; every request on it is a warning and
/// a no-op.
pub struct SnapshotController {
    config: HeapDumpConfig,
    inbox: Option<mpsc::Sender<SnapshotRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl SnapshotController {
    /// Start the controller. When heap dumps are enabled this creates the
    /// target directory, subscribes to `SIGUSR2` and arms the periodic timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &HeapDumpConfig) -> HeapDumpResult<Self> {
        if !config.enabled {
            return Ok(Self {
                config: config.clone(),
                inbox: None,
                worker: None,
            });
        }

        if !config.directory.is_dir() {
            std::fs::create_dir_all(&config.directory).map_err(|source| {
                HeapDumpError::CreateDirFailed {
                    path: config.directory.clone(),
                    source,
                }
            })?;
            println!(
                "📁 Created heapdump directory: {}",
                config.directory.display()
            );
        }

        let timer = config
            .interval
            .filter(|period| !period.is_zero())
            .and_then(periodic_timer);

        let (inbox, requests) = mpsc::channel(INBOX_CAPACITY);
        let worker = tokio::spawn(run_worker(
            SnapshotWriter::new(config.directory.clone()),
            requests,
            DumpSignal::register(),
            timer,
        ));

        println!("🔍 Heapdump monitoring enabled");
        info!(
            directory = %config.directory.display(),
            interval_secs = config.interval.map(|period| period.as_secs()),
            "Heapdump controller started"
        );

        Ok(Self {
            config: config.clone(),
            inbox: Some(inbox),
            worker: Some(worker),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Take a snapshot and wait for it to be written.
    ///
    /// Returns the file path, or `None` when heap dumps are disabled or the
    /// write failed. Never an error: the failure has already been reported.
    pub async fn snapshot(&self, trigger: SnapshotTrigger) -> Option<PathBuf> {
        let Some(inbox) = &self.inbox else {
            println!("⚠️  Heapdump is not enabled. Set HEAPDUMP_ENABLED=true to enable.");
            warn!(%trigger, "Heap snapshot requested while heapdump is disabled");
            return None;
        };

        let (reply, response) = oneshot::channel();
        if inbox.send(SnapshotRequest { trigger, reply }).await.is_err() {
            error!(%trigger, "Snapshot worker is no longer running");
            return None;
        }

        response.await.ok().flatten()
    }

    /// Stop the worker: pending requests are served, then the timer and the
    /// signal subscription are dropped.
    pub async fn shutdown(mut self) {
        self.inbox.take();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!("Snapshot worker terminated abnormally: {}", e);
            }
        }
    }
}

impl Drop for SnapshotController {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_worker(
    mut writer: SnapshotWriter,
    mut requests: mpsc::Receiver<SnapshotRequest>,
    mut signal: DumpSignal,
    mut timer: Option<Interval>,
) {
    debug!("Snapshot worker running for {}", writer.directory().display());

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(SnapshotRequest { trigger, reply }) => {
                    let path = take_snapshot(&mut writer, trigger);
                    let _ = reply.send(path);
                }
                None => break,
            },
            () = signal.recv() => {
                take_snapshot(&mut writer, SnapshotTrigger::Signal);
            }
            _ = next_tick(&mut timer) => {
                take_snapshot(&mut writer, SnapshotTrigger::Periodic);
            }
        }
    }

    debug!("Snapshot worker stopped");
}

fn take_snapshot(writer: &mut SnapshotWriter, trigger: SnapshotTrigger) -> Option<PathBuf> {
    match writer.write(trigger) {
        Ok(written) => {
            println!("📸 Heap snapshot saved: {}", written.path.display());
            println!("💾 Memory usage: {}", written.memory.summary());
            info!(
                %trigger,
                path = %written.path.display(),
                rss = written.memory.rss,
                heap_used = written.memory.heap_used,
                "Heap snapshot written"
            );
            Some(written.path)
        }
        Err(e) => {
            eprintln!("❌ Failed to take heap snapshot: {}", e);
            error!(%trigger, "Heap snapshot failed: {}", e);
            None
        }
    }
}

/// Timer whose first tick is one `period` after now. `None` when that instant
/// is not representable.
fn periodic_timer(period: Duration) -> Option<Interval> {
    let Some(first_tick) = Instant::now().checked_add(period) else {
        warn!(
            interval_secs = period.as_secs(),
            "Heapdump interval out of range, periodic snapshots disabled"
        );
        return None;
    };

    let mut timer = interval_at(first_tick, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    println!(
        "⏰ Periodic heap snapshots enabled (every {}s)",
        period.as_secs()
    );
    Some(timer)
}

async fn next_tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

/// `SIGUSR2` subscription. Pends forever where the signal is unavailable.
struct DumpSignal {
    #[cfg(unix)]
    inner: Option<tokio::signal::unix::Signal>,
}

impl DumpSignal {
    #[cfg(unix)]
    fn register() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::user_defined2()) {
            Ok(inner) => Self { inner: Some(inner) },
            Err(e) => {
                warn!("Could not register SIGUSR2 handler, signal snapshots disabled: {}", e);
                Self { inner: None }
            }
        }
    }

    #[cfg(not(unix))]
    fn register() -> Self {
        Self {}
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            if inner.recv().await.is_some() {
                return;
            }
            self.inner = None;
        }
        std::future::pending::<()>().await
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn snapshot_files(dir: &Path, trigger: &str) -> Vec<PathBuf> {
        let prefix = format!("heapdump-{trigger}-");
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".heapsnapshot"))
            })
            .collect();
        files.sort();
        files
    }

    fn enabled_config(dir: PathBuf) -> HeapDumpConfig {
        HeapDumpConfig {
            enabled: true,
            directory: dir,
            interval: None,
        }
    }

    #[tokio::test]
    async fn test_disabled_controller_is_a_noop() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("heapdumps");
        let config = HeapDumpConfig {
            enabled: false,
            directory: dir.clone(),
            interval: Some(Duration::from_millis(50)),
        };

        let controller = SnapshotController::start(&config).unwrap();
        assert!(!controller.is_enabled());
        assert_eq!(controller.snapshot(SnapshotTrigger::Manual).await, None);
        controller.shutdown().await;

        assert!(!dir.exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_start_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("tmp/snaps");

        let controller = SnapshotController::start(&enabled_config(dir.clone())).unwrap();
        assert!(dir.is_dir());
        controller.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_start_fails_when_directory_is_a_file() {
        let temp = TempDir::new().unwrap();
        let occupied = temp.path().join("heapdumps");
        std::fs::write(&occupied, "not a directory").unwrap();

        let result = SnapshotController::start(&enabled_config(occupied.clone()));

        match result {
            Err(HeapDumpError::CreateDirFailed { path, .. }) => assert_eq!(path, occupied),
            Err(other) => panic!("expected CreateDirFailed, got {:?}", other),
            Ok(_) => panic!("expected CreateDirFailed, controller started"),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_out_of_range_interval_disables_timer() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        let config = HeapDumpConfig {
            interval: Some(Duration::MAX),
            ..enabled_config(dir.clone())
        };

        let controller = SnapshotController::start(&config).unwrap();
        assert!(controller.snapshot(SnapshotTrigger::Manual).await.is_some());
        controller.shutdown().await;

        assert!(snapshot_files(&dir, "periodic").is_empty());
        assert_eq!(snapshot_files(&dir, "manual").len(), 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_clamped_interval_from_env_starts() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().display().to_string();
        let config = crate::config::MonitorConfig::from_lookup(|key| match key {
            "HEAPDUMP_ENABLED" => Some("true".to_string()),
            "HEAPDUMP_DIR" => Some(dir.clone()),
            "HEAPDUMP_INTERVAL" => Some("10000000000000000000".to_string()),
            _ => None,
        });

        let controller = SnapshotController::start(&config.heapdump).unwrap();
        assert!(controller.is_enabled());
        controller.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_manual_snapshot_writes_one_file() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();

        let controller = SnapshotController::start(&enabled_config(dir.clone())).unwrap();
        let path = controller
            .snapshot(SnapshotTrigger::Manual)
            .await
            .expect("snapshot path");
        controller.shutdown().await;

        assert_eq!(snapshot_files(&dir, "manual"), vec![path.clone()]);
        let snapshot: HeapSnapshot =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(snapshot.trigger, SnapshotTrigger::Manual);
        assert_eq!(snapshot.sequence, 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_write_failure_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("snaps");

        let controller = SnapshotController::start(&enabled_config(dir.clone())).unwrap();
        std::fs::remove_dir(&dir).unwrap();

        assert_eq!(controller.snapshot(SnapshotTrigger::Manual).await, None);

        std::fs::create_dir(&dir).unwrap();
        assert!(controller.snapshot(SnapshotTrigger::PostTest).await.is_some());
        controller.shutdown().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_periodic_snapshots() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        let config = HeapDumpConfig {
            interval: Some(Duration::from_millis(100)),
            ..enabled_config(dir.clone())
        };

        let controller = SnapshotController::start(&config).unwrap();
        assert!(snapshot_files(&dir, "periodic").is_empty());
        tokio::time::sleep(Duration::from_millis(450)).await;
        controller.shutdown().await;

        let written = snapshot_files(&dir, "periodic").len();
        assert!(written >= 2, "expected periodic snapshots, found {written}");

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(snapshot_files(&dir, "periodic").len(), written);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_signal_triggers_snapshot() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();

        let controller = SnapshotController::start(&enabled_config(dir.clone())).unwrap();

        let status = std::process::Command::new("kill")
            .args(["-USR2", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        for _ in 0..50 {
            if !snapshot_files(&dir, "signal").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        controller.shutdown().await;

        assert_eq!(snapshot_files(&dir, "signal").len(), 1);
    }
}
