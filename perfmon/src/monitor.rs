//! The orchestrator: owns the configuration and one instance of every
//! component, and exposes one method per CLI command.

use crate::command::Command;
use crate::config::{ConfigError, MonitorConfig};
use crate::directories::{self, BootstrapError};
use crate::heapdump::{HeapDumpError, SnapshotController, SnapshotTrigger};
use crate::report::{render_banner, render_info};
use crate::runner::{RunError, TestRunner};
use crate::services::{ProberError, ServiceProber, ServiceReport};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    HeapDump(#[from] HeapDumpError),

    #[error(transparent)]
    Prober(#[from] ProberError),

    #[error(transparent)]
    Run(#[from] RunError),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

pub struct PerformanceMonitor {
    config: MonitorConfig,
    prober: ServiceProber,
    snapshots: SnapshotController,
    runner: TestRunner,
}

impl PerformanceMonitor {
    /// Validate `config` and start every component. With heap dumps enabled
    /// this creates the heap-dump directory and starts the snapshot worker,
    /// so it must run inside a tokio runtime.
    pub fn new(config: MonitorConfig) -> MonitorResult<Self> {
        config.validate()?;

        let prober = ServiceProber::new(config.services.clone(), config.probe_timeout)?;
        let snapshots = SnapshotController::start(&config.heapdump)?;
        let runner = TestRunner::new(config.engine.clone());

        Ok(Self {
            config,
            prober,
            snapshots,
            runner,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub async fn execute(&self, command: Command) -> MonitorResult<()> {
        info!(%command, "Executing command");

        match command {
            Command::Test => self.run_tests(&self.config.default_test_file).await,
            Command::TestAll => self.run_tests(&self.config.all_tests_pattern).await,
            Command::HeapDump => {
                self.take_snapshot().await;
                Ok(())
            }
            Command::Info => {
                self.show_info();
                Ok(())
            }
            Command::Init => {
                self.init().await?;
                self.show_info();
                Ok(())
            }
        }
    }

    /// Create the working directories and probe the services.
    pub async fn init(&self) -> MonitorResult<Vec<ServiceReport>> {
        println!("🚀 Initializing Performance Monitoring System...");

        directories::bootstrap(&self.config.bootstrap_dirs())?;
        let reports = self.prober.check_all().await;

        println!("✅ Performance monitoring system initialized successfully!");
        print!("{}", render_banner(&self.config));

        Ok(reports)
    }

    pub async fn run_tests(&self, test_file: &str) -> MonitorResult<()> {
        self.runner.run(test_file, &self.snapshots).await?;
        Ok(())
    }

    /// Manual heap snapshot; `None` when disabled or the write failed.
    pub async fn take_snapshot(&self) -> Option<PathBuf> {
        self.snapshots.snapshot(SnapshotTrigger::Manual).await
    }

    pub fn show_info(&self) {
        print!("{}", render_info(&self.config));
    }

    /// Stop the snapshot worker and its timer/signal subscription.
    pub async fn shutdown(self) {
        self.snapshots.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineCommand, HeapDumpConfig, ServiceEndpoint};
    use serial_test::serial;
    use std::time::Duration;
    use tempfile::TempDir;

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}")
    }

    fn offline_config(root: &std::path::Path) -> MonitorConfig {
        MonitorConfig::default()
            .with_services(vec![
                ServiceEndpoint::new("grafana", closed_port_url()),
                ServiceEndpoint::new("influxdb", format!("{}/ping", closed_port_url())),
            ])
            .with_probe_timeout(Duration::from_secs(2))
            .with_working_dirs(vec![root.join("data"), root.join("log")])
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = MonitorConfig::default().with_engine(EngineCommand::new(""));
        assert!(matches!(
            PerformanceMonitor::new(config),
            Err(MonitorError::Config(ConfigError::EmptyEngine))
        ));
    }

    #[tokio::test]
    async fn test_init_survives_unreachable_services() {
        let temp = TempDir::new().unwrap();
        let monitor = PerformanceMonitor::new(offline_config(temp.path())).unwrap();

        let reports = monitor.init().await.unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|report| !report.status.is_ok()));
        assert!(temp.path().join("data").is_dir());
        assert!(temp.path().join("log").is_dir());

        monitor.execute(Command::Init).await.unwrap();
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_fails_when_directory_is_blocked() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("log"), "").unwrap();
        let monitor = PerformanceMonitor::new(offline_config(temp.path())).unwrap();

        let result = monitor.execute(Command::Init).await;
        assert!(matches!(result, Err(MonitorError::Bootstrap(_))));
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_run_propagates() {
        let temp = TempDir::new().unwrap();
        let config = offline_config(temp.path())
            .with_engine(EngineCommand::new("sh").with_args(["-c", "exit 7", "sh"]));
        let monitor = PerformanceMonitor::new(config).unwrap();

        let err = monitor.execute(Command::Test).await.unwrap_err();
        assert!(matches!(err, MonitorError::Run(RunError::Failed { code: 7 })));
        assert_eq!(err.to_string(), "K6 tests failed with code 7");
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_heapdump_command_while_disabled_is_ok() {
        let temp = TempDir::new().unwrap();
        let monitor = PerformanceMonitor::new(offline_config(temp.path())).unwrap();

        assert_eq!(monitor.take_snapshot().await, None);
        monitor.execute(Command::HeapDump).await.unwrap();
        monitor.shutdown().await;
        assert!(!temp.path().join("heapdumps").exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_init_creates_heapdump_directory_when_enabled() {
        let temp = TempDir::new().unwrap();
        let snaps = temp.path().join("snaps");
        let config = offline_config(temp.path()).with_heapdump(HeapDumpConfig {
            enabled: true,
            directory: snaps.clone(),
            interval: None,
        });
        let monitor = PerformanceMonitor::new(config).unwrap();
        assert!(snaps.is_dir());

        let path = monitor.take_snapshot().await.unwrap();
        assert!(path.starts_with(&snaps));
        monitor.shutdown().await;
    }
}
