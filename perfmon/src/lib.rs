pub mod command;
pub mod config;
pub mod directories;
pub mod heapdump;
pub mod monitor;
pub mod report;
pub mod runner;
pub mod services;

pub use command::Command;
pub use config::{ConfigError, EngineCommand, HeapDumpConfig, MonitorConfig, ServiceEndpoint};
pub use directories::{bootstrap, BootstrapError};
pub use heapdump::{
    HeapDumpError, MemoryUsage, SnapshotController, SnapshotTrigger, TrackingAllocator,
};
pub use monitor::{MonitorError, MonitorResult, PerformanceMonitor};
pub use report::{render_banner, render_info};
pub use runner::{expand_test_paths, RunError, TestRunner};
pub use services::{ProbeStatus, ServiceProber, ServiceReport};
