//! Load-test engine lifecycle: spawn, wait, map the exit status.

use crate::config::EngineCommand;
use crate::heapdump::{SnapshotController, SnapshotTrigger};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

pub const INSTALL_HINT: &str =
    "💡 Make sure K6 is installed: https://k6.io/docs/get-started/installation/";

#[derive(Error, Debug)]
pub enum RunError {
    /// The engine ran and exited with a non-zero code
    #[error("K6 tests failed with code {code}")]
    Failed { code: i32 },

    /// The engine was killed by a signal and reported no exit code
    #[error("K6 tests were terminated before reporting an exit code")]
    Terminated,

    /// The engine could not be started at all
    #[error("Failed to start load-test engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine started but waiting on it failed
    #[error("Failed to wait for load-test engine '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type RunResult<T> = Result<T, RunError>;

/// Expand a test path the way a shell would: glob patterns become the sorted
/// list of matching files, and a pattern with no match is passed through
/// unchanged.
pub fn expand_test_paths(pattern: &str) -> Vec<String> {
    if !pattern.contains(['*', '?', '[']) {
        return vec![pattern.to_string()];
    }

    let mut matches: Vec<String> = match glob::glob(pattern) {
        Ok(paths) => paths
            .filter_map(Result::ok)
            .map(|path| path.display().to_string())
            .collect(),
        Err(e) => {
            warn!("Invalid test file pattern '{}': {}", pattern, e);
            Vec::new()
        }
    };
    matches.sort();

    if matches.is_empty() {
        vec![pattern.to_string()]
    } else {
        matches
    }
}

/// Map the engine's exit status onto a run result.
pub fn check_exit_status(status: ExitStatus) -> RunResult<()> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(RunError::Failed { code }),
        None => Err(RunError::Terminated),
    }
}

pub struct TestRunner {
    engine: EngineCommand,
}

impl TestRunner {
    pub fn new(engine: EngineCommand) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &EngineCommand {
        &self.engine
    }

    /// `<program> <args...> run <paths...>` with the console inherited.
    fn command(&self, paths: &[String]) -> Command {
        let mut command = Command::new(&self.engine.program);
        command
            .args(&self.engine.args)
            .arg("run")
            .args(paths)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command
    }

    /// Run the engine against `test_file` and wait for it to exit.
    ///
    /// Pre- and post-test heap snapshots are taken when `snapshots` is
    /// enabled. No post-test snapshot is taken if the engine never started.
    pub async fn run(&self, test_file: &str, snapshots: &SnapshotController) -> RunResult<()> {
        println!("🧪 Running performance tests: {}", test_file);

        if snapshots.is_enabled() {
            println!("📸 Taking pre-test heap snapshot...");
            snapshots.snapshot(SnapshotTrigger::PreTest).await;
        }

        let paths = expand_test_paths(test_file);
        info!(
            program = %self.engine.program,
            files = paths.len(),
            "Starting load-test engine"
        );

        let mut child = match self.command(&paths).spawn() {
            Ok(child) => child,
            Err(source) => {
                eprintln!("❌ Failed to start K6 tests: {}", source);
                println!("{}", INSTALL_HINT);
                error!(program = %self.engine.program, "Engine spawn failed: {}", source);
                return Err(RunError::Spawn {
                    program: self.engine.program.clone(),
                    source,
                });
            }
        };

        let status = child.wait().await.map_err(|source| RunError::Wait {
            program: self.engine.program.clone(),
            source,
        });

        if snapshots.is_enabled() {
            println!("📸 Taking post-test heap snapshot...");
            snapshots.snapshot(SnapshotTrigger::PostTest).await;
        }

        let result = status.and_then(check_exit_status);
        match &result {
            Ok(()) => {
                println!("✅ Performance tests completed successfully");
                info!("Load test run succeeded");
            }
            Err(RunError::Failed { code }) => {
                println!("❌ Performance tests failed with code {}", code);
                warn!(code, "Load test run failed");
            }
            Err(e) => {
                println!("❌ Performance tests failed: {}", e);
                warn!("Load test run failed: {}", e);
            }
        }

        result
    }
}
