use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters. Only the event loop thread writes them, so relaxed
/// ordering is enough.
static ACCEPTED: AtomicU64 = AtomicU64::new(0);
static COMPLETED: AtomicU64 = AtomicU64::new(0);
static RETIRED: AtomicU64 = AtomicU64::new(0);
static BYTES: AtomicU64 = AtomicU64::new(0);
static ERRORS: AtomicU64 = AtomicU64::new(0);
static GROWTHS: AtomicU64 = AtomicU64::new(0);

/// A new client was admitted.
pub fn inc_accepted() { ACCEPTED.fetch_add(1, Ordering::Relaxed); }
/// Every payload byte of a response reached the kernel.
pub fn inc_completed() { COMPLETED.fetch_add(1, Ordering::Relaxed); }
/// A connection was closed and its table entry reset.
pub fn inc_retired() { RETIRED.fetch_add(1, Ordering::Relaxed); }
/// Add to total bytes handed to sockets (header included).
pub fn add_bytes(n: u64) { BYTES.fetch_add(n, Ordering::Relaxed); }
/// A connection failed with a non-transient error.
pub fn inc_errors() { ERRORS.fetch_add(1, Ordering::Relaxed); }
/// The connection table doubled its capacity.
pub fn inc_growths() { GROWTHS.fetch_add(1, Ordering::Relaxed); }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub accepted: u64,
    pub completed: u64,
    pub retired: u64,
    pub bytes: u64,
    pub errors: u64,
    pub growths: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        accepted: ACCEPTED.load(Ordering::Relaxed),
        completed: COMPLETED.load(Ordering::Relaxed),
        retired: RETIRED.load(Ordering::Relaxed),
        bytes: BYTES.load(Ordering::Relaxed),
        errors: ERRORS.load(Ordering::Relaxed),
        growths: GROWTHS.load(Ordering::Relaxed),
    }
}

/// One-line summary for the shutdown log.
pub fn render() -> String {
    let s = snapshot();
    format!(
        "accepted={} completed={} retired={} bytes={} errors={} table_growths={}",
        s.accepted, s.completed, s.retired, s.bytes, s.errors, s.growths
    )
}
