use clap::Parser;
use perfmon::{Command, MonitorConfig, MonitorError, PerformanceMonitor, TrackingAllocator};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static ALLOCATOR: TrackingAllocator = TrackingAllocator;

#[derive(Parser)]
#[command(name = "perfmon", version)]
#[command(about = "Coordinate a local k6 + InfluxDB + Grafana performance-testing stack")]
struct Cli {
    /// One of `test`, `test:all`, `heapdump` or `info`. Anything else (or
    /// nothing) bootstraps directories, checks services and prints the report.
    command: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let command = Command::from_token(cli.command.as_deref());

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            debug!(%command, "Command failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), MonitorError> {
    let monitor = PerformanceMonitor::new(MonitorConfig::from_env())?;
    let result = monitor.execute(command).await;
    monitor.shutdown().await;
    result
}
