use super::memory::{proc_status_memory, AllocatorStats, MemoryUsage};
use super::{HeapDumpError, HeapDumpResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const SNAPSHOT_EXTENSION: &str = "heapsnapshot";

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotTrigger {
    Manual,
    Signal,
    Periodic,
    PreTest,
    PostTest,
}

impl SnapshotTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotTrigger::Manual => "manual",
            SnapshotTrigger::Signal => "signal",
            SnapshotTrigger::Periodic => "periodic",
            SnapshotTrigger::PreTest => "pre-test",
            SnapshotTrigger::PostTest => "post-test",
        }
    }
}

impl fmt::Display for SnapshotTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replace the `:` and `.` of an ISO-8601 timestamp so it is safe in a file
/// name on every platform.
pub fn sanitize_timestamp(timestamp: &str) -> String {
    timestamp.replace([':', '.'], "-")
}

/// `heapdump-<trigger>-<timestamp>.heapsnapshot`
pub fn snapshot_file_name(trigger: SnapshotTrigger, taken_at: DateTime<Utc>) -> String {
    let timestamp = taken_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    format!(
        "heapdump-{}-{}.{}",
        trigger,
        sanitize_timestamp(&timestamp),
        SNAPSHOT_EXTENSION
    )
}

/// Document written to a `.heapsnapshot` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapSnapshot {
    pub trigger: SnapshotTrigger,
    pub taken_at: DateTime<Utc>,
    pub pid: u32,
    /// Position of this snapshot among those taken by this process
    pub sequence: u64,
    pub memory: MemoryUsage,
    pub allocator: AllocatorStats,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proc_status: BTreeMap<String, String>,
}

impl HeapSnapshot {
    pub fn capture(trigger: SnapshotTrigger, sequence: u64) -> Self {
        Self {
            trigger,
            taken_at: Utc::now(),
            pid: std::process::id(),
            sequence,
            memory: MemoryUsage::current(),
            allocator: AllocatorStats::current(),
            proc_status: proc_status_memory(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WrittenSnapshot {
    pub path: PathBuf,
    pub memory: MemoryUsage,
}

/// Writes snapshots into one directory, numbering them in order.
#[derive(Debug)]
pub struct SnapshotWriter {
    directory: PathBuf,
    sequence: u64,
}

impl SnapshotWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            sequence: 0,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn write(&mut self, trigger: SnapshotTrigger) -> HeapDumpResult<WrittenSnapshot> {
        self.sequence += 1;
        let snapshot = HeapSnapshot::capture(trigger, self.sequence);
        let path = self
            .directory
            .join(snapshot_file_name(trigger, snapshot.taken_at));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| HeapDumpError::WriteFailed {
                path: path.clone(),
                source,
            })?;

        write_or_discard(BufWriter::new(file), &snapshot, &path)?;

        Ok(WrittenSnapshot {
            path,
            memory: snapshot.memory,
        })
    }
}

/// Serialize `snapshot` through `writer`, removing the file at `path` if the
/// document could not be written in full.
fn write_or_discard<W: Write>(
    mut writer: W,
    snapshot: &HeapSnapshot,
    path: &Path,
) -> HeapDumpResult<()> {
    let result = serde_json::to_writer_pretty(&mut writer, snapshot)
        .map_err(HeapDumpError::from)
        .and_then(|()| {
            writer.flush().map_err(|source| HeapDumpError::WriteFailed {
                path: path.to_path_buf(),
                source,
            })
        });
    drop(writer);

    if result.is_err() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), "Could not remove partial snapshot: {}", e);
        }
    }
    result
}
