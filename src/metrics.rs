//! Process-wide counters for database operations.
use std::sync::atomic::{AtomicU64, Ordering};

static READS_STARTED: AtomicU64 = AtomicU64::new(0);
static READS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static WRITES_STARTED: AtomicU64 = AtomicU64::new(0);
static WRITES_COMPLETED: AtomicU64 = AtomicU64::new(0);
static RESTARTS: AtomicU64 = AtomicU64::new(0);
static TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static RECORDS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static RECORDS_REJECTED: AtomicU64 = AtomicU64::new(0);
static PEEKS: AtomicU64 = AtomicU64::new(0);
static POKES: AtomicU64 = AtomicU64::new(0);
static CHANGES_APPLIED: AtomicU64 = AtomicU64::new(0);

pub fn inc_reads_started() {
    READS_STARTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_reads_completed() {
    READS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_writes_started() {
    WRITES_STARTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_writes_completed() {
    WRITES_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_restarts() {
    RESTARTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_timeouts() {
    TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_records_accepted() {
    RECORDS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_records_rejected() {
    RECORDS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_peeks() {
    PEEKS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_pokes() {
    POKES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_changes_applied() {
    CHANGES_APPLIED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub reads_started: u64,
    pub reads_completed: u64,
    pub writes_started: u64,
    pub writes_completed: u64,
    pub restarts: u64,
    pub timeouts: u64,
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub peeks: u64,
    pub pokes: u64,
    pub changes_applied: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        reads_started: READS_STARTED.load(Ordering::Relaxed),
        reads_completed: READS_COMPLETED.load(Ordering::Relaxed),
        writes_started: WRITES_STARTED.load(Ordering::Relaxed),
        writes_completed: WRITES_COMPLETED.load(Ordering::Relaxed),
        restarts: RESTARTS.load(Ordering::Relaxed),
        timeouts: TIMEOUTS.load(Ordering::Relaxed),
        records_accepted: RECORDS_ACCEPTED.load(Ordering::Relaxed),
        records_rejected: RECORDS_REJECTED.load(Ordering::Relaxed),
        peeks: PEEKS.load(Ordering::Relaxed),
        pokes: POKES.load(Ordering::Relaxed),
        changes_applied: CHANGES_APPLIED.load(Ordering::Relaxed),
    }
}
