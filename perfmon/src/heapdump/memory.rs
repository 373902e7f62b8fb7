//! Process memory accounting.
//!
//! Resident and virtual sizes come from `sysinfo`. Heap figures come from
//! [`TrackingAllocator`], which the `perfmon` binary installs as its global
//! allocator; without it the heap counters stay at zero.

use serde::{Deserialize, Serialize};
use std::alloc::{GlobalAlloc, Layout, System};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate};

static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static DEALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static TOTAL_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
static PEAK_BYTES: AtomicUsize = AtomicUsize::new(0);

/// System allocator wrapper that keeps running allocation counters.
pub struct TrackingAllocator;

fn record_alloc(size: usize) {
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    TOTAL_ALLOCATED.fetch_add(size as u64, Ordering::Relaxed);
    let live = LIVE_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    PEAK_BYTES.fetch_max(live, Ordering::Relaxed);
}

fn record_dealloc(size: usize) {
    DEALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    LIVE_BYTES.fetch_sub(size, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        record_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            let old_size = layout.size();
            if new_size >= old_size {
                let grown = new_size - old_size;
                TOTAL_ALLOCATED.fetch_add(grown as u64, Ordering::Relaxed);
                let live = LIVE_BYTES.fetch_add(grown, Ordering::Relaxed) + grown;
                PEAK_BYTES.fetch_max(live, Ordering::Relaxed);
            } else {
                LIVE_BYTES.fetch_sub(old_size - new_size, Ordering::Relaxed);
            }
        }
        new_ptr
    }
}

/// Counters maintained by [`TrackingAllocator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    pub allocations: u64,
    pub deallocations: u64,
    pub total_allocated_bytes: u64,
    pub live_bytes: u64,
    pub peak_live_bytes: u64,
}

impl AllocatorStats {
    pub fn current() -> Self {
        Self {
            allocations: ALLOCATIONS.load(Ordering::Relaxed),
            deallocations: DEALLOCATIONS.load(Ordering::Relaxed),
            total_allocated_bytes: TOTAL_ALLOCATED.load(Ordering::Relaxed),
            live_bytes: LIVE_BYTES.load(Ordering::Relaxed) as u64,
            peak_live_bytes: PEAK_BYTES.load(Ordering::Relaxed) as u64,
        }
    }
}

/// Memory usage of the current process, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Resident set size
    pub rss: u64,
    /// High-water mark of live heap bytes
    pub heap_total: u64,
    /// Heap bytes currently live
    pub heap_used: u64,
    /// Resident memory not owned by the heap (stacks, code, mapped files)
    pub external: u64,
    /// Virtual memory size
    pub virtual_memory: u64,
}

impl MemoryUsage {
    pub fn current() -> Self {
        let (rss, virtual_memory) = process_memory();
        Self::from_parts(rss, virtual_memory, AllocatorStats::current())
    }

    fn from_parts(rss: u64, virtual_memory: u64, stats: AllocatorStats) -> Self {
        Self {
            rss,
            heap_total: stats.peak_live_bytes,
            heap_used: stats.live_bytes,
            external: rss.saturating_sub(stats.live_bytes),
            virtual_memory,
        }
    }

    /// One-line summary in whole megabytes.
    pub fn summary(&self) -> String {
        format!(
            "rss={}MB, heapTotal={}MB, heapUsed={}MB, external={}MB",
            to_megabytes(self.rss),
            to_megabytes(self.heap_total),
            to_megabytes(self.heap_used),
            to_megabytes(self.external),
        )
    }
}

/// Bytes to megabytes, rounded to the nearest whole number.
pub fn to_megabytes(bytes: u64) -> u64 {
    (bytes as f64 / 1024.0 / 1024.0).round() as u64
}

fn process_memory() -> (u64, u64) {
    let pid = Pid::from_u32(std::process::id());
    let mut system = sysinfo::System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new().with_memory(),
    );

    system
        .process(pid)
        .map(|process| (process.memory(), process.virtual_memory()))
        .unwrap_or((0, 0))
}

/// Memory lines (`Vm*`, `Rss*`) of `/proc/self/status`.
#[cfg(target_os = "linux")]
pub fn proc_status_memory() -> BTreeMap<String, String> {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return BTreeMap::new();
    };

    status
        .lines()
        .filter(|line| line.starts_with("Vm") || line.starts_with("Rss"))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), value.trim().to_string()))
        .collect()
}

#[cfg(not(target_os = "linux"))]
pub fn proc_status_memory() -> BTreeMap<String, String> {
    BTreeMap::new()
}
