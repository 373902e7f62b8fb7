use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GRAFANA_URL: &str = "http://localhost:3000";
pub const DEFAULT_INFLUXDB_URL: &str = "http://localhost:8086/ping";
pub const DEFAULT_HEAPDUMP_DIR: &str = "heapdumps";
pub const DEFAULT_ENGINE: &str = "k6";
pub const DEFAULT_TEST_FILE: &str = "tests/performance/lots.js";
pub const ALL_TESTS_PATTERN: &str = "tests/performance/*.js";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Service '{name}' has invalid URL '{url}': must start with http:// or https://")]
    InvalidServiceUrl { name: String, url: String },

    #[error("Load-test engine command cannot be empty")]
    EmptyEngine,

    #[error("Heapdump directory cannot be empty")]
    EmptyHeapdumpDir,

    #[error("Probe timeout must be greater than 0")]
    ZeroProbeTimeout,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// An external HTTP service the monitor checks on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub port: u16,
    pub url: String,
}

impl ServiceEndpoint {
    /// Build an endpoint, deriving the port from the URL (scheme default when
    /// the URL carries none, 0 when the URL does not parse).
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let port = reqwest::Url::parse(&url)
            .ok()
            .and_then(|parsed| parsed.port_or_known_default())
            .unwrap_or(0);

        Self {
            name: name.into(),
            port,
            url,
        }
    }

    pub fn grafana() -> Self {
        Self::new("grafana", DEFAULT_GRAFANA_URL)
    }

    pub fn influxdb() -> Self {
        Self::new("influxdb", DEFAULT_INFLUXDB_URL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapDumpConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Period of the `periodic` snapshot timer; `None` disables it.
    pub interval: Option<Duration>,
}

impl Default for HeapDumpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from(DEFAULT_HEAPDUMP_DIR),
            interval: None,
        }
    }
}

/// The command line used to launch the load-test engine. `run <path>` is
/// appended after `args`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Split a whitespace-separated command line such as
    /// `docker run --rm -i grafana/k6`. Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub services: Vec<ServiceEndpoint>,
    pub heapdump: HeapDumpConfig,
    pub engine: EngineCommand,
    pub probe_timeout: Duration,
    pub default_test_file: String,
    pub all_tests_pattern: String,
    /// Working directories created by the bootstrapper, in creation order.
    pub working_dirs: Vec<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            services: vec![ServiceEndpoint::grafana(), ServiceEndpoint::influxdb()],
            heapdump: HeapDumpConfig::default(),
            engine: EngineCommand::default(),
            probe_timeout: Duration::from_secs(10),
            default_test_file: DEFAULT_TEST_FILE.to_string(),
            all_tests_pattern: ALL_TESTS_PATTERN.to_string(),
            working_dirs: ["data", "data/grafana", "data/influxdb", "log"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.heapdump.enabled = lookup("HEAPDUMP_ENABLED").as_deref() == Some("true");
        if let Some(dir) = lookup("HEAPDUMP_DIR").filter(|dir| !dir.is_empty()) {
            config.heapdump.directory = PathBuf::from(dir);
        }
        config.heapdump.interval = lookup("HEAPDUMP_INTERVAL")
            .as_deref()
            .and_then(parse_interval);

        if let Some(url) = lookup("GRAFANA_URL").filter(|url| !url.is_empty()) {
            config.services[0] = ServiceEndpoint::new("grafana", url);
        }
        if let Some(url) = lookup("INFLUXDB_URL").filter(|url| !url.is_empty()) {
            config.services[1] = ServiceEndpoint::new("influxdb", url);
        }
        if let Some(engine) = lookup("K6_BIN").as_deref().and_then(EngineCommand::parse) {
            config.engine = engine;
        }

        config
    }

    pub fn with_services(mut self, services: Vec<ServiceEndpoint>) -> Self {
        self.services = services;
        self
    }

    pub fn with_heapdump(mut self, heapdump: HeapDumpConfig) -> Self {
        self.heapdump = heapdump;
        self
    }

    pub fn with_engine(mut self, engine: EngineCommand) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_working_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.working_dirs = dirs;
        self
    }

    pub fn service(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Every directory the bootstrapper should ensure, heap-dump directory
    /// included when heap dumps are enabled.
    pub fn bootstrap_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.working_dirs.clone();
        if self.heapdump.enabled {
            dirs.push(self.heapdump.directory.clone());
        }
        dirs
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for service in &self.services {
            if !service.url.starts_with("http://") && !service.url.starts_with("https://") {
                return Err(ConfigError::InvalidServiceUrl {
                    name: service.name.clone(),
                    url: service.url.clone(),
                });
            }
        }

        if self.engine.program.trim().is_empty() {
            return Err(ConfigError::EmptyEngine);
        }

        if self.heapdump.enabled && self.heapdump.directory.as_os_str().is_empty() {
            return Err(ConfigError::EmptyHeapdumpDir);
        }

        if self.probe_timeout.is_zero() {
            return Err(ConfigError::ZeroProbeTimeout);
        }

        Ok(())
    }
}

/// Longest accepted snapshot period, about 136 years.
pub const MAX_HEAPDUMP_INTERVAL: Duration = Duration::from_secs(u32::MAX as u64);

/// Whole seconds of `HEAPDUMP_INTERVAL`. Fractions are truncated and values
/// above [`MAX_HEAPDUMP_INTERVAL`] are clamped to it; anything that is not a
/// number of at least one second disables the timer.
fn parse_interval(raw: &str) -> Option<Duration> {
    let seconds: f64 = raw.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 1.0 {
        return None;
    }
    let seconds = seconds.trunc().min(MAX_HEAPDUMP_INTERVAL.as_secs() as f64);
    Some(Duration::from_secs(seconds as u64))
}
