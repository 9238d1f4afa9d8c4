// Rotating uid/gid allocation for sandboxed children
use crucible_common::Settings;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out `(uid, gid)` pairs from the configured contiguous ranges.
///
/// Allocation rotates monotonically modulo the range size and never blocks
/// or fails. The pool does not track liveness: when concurrency exceeds the
/// range size, two live jobs can hold the same uid. Correctness does not
/// depend on exclusivity — workspaces are keyed by job UUID and kills are
/// keyed by process group.
#[derive(Debug)]
pub struct IdentityPool {
    uid_min: u32,
    uid_span: u64,
    gid_min: u32,
    gid_span: u64,
    uid_cursor: AtomicU64,
    gid_cursor: AtomicU64,
}

impl IdentityPool {
    pub fn new(settings: &Settings) -> Self {
        Self {
            uid_min: settings.runner_uid_min,
            uid_span: u64::from(settings.runner_uid_max - settings.runner_uid_min) + 1,
            gid_min: settings.runner_gid_min,
            gid_span: u64::from(settings.runner_gid_max - settings.runner_gid_min) + 1,
            uid_cursor: AtomicU64::new(0),
            gid_cursor: AtomicU64::new(0),
        }
    }

    pub fn allocate(&self) -> (u32, u32) {
        let u = self.uid_cursor.fetch_add(1, Ordering::Relaxed) % self.uid_span;
        let g = self.gid_cursor.fetch_add(1, Ordering::Relaxed) % self.gid_span;
        (self.uid_min + u as u32, self.gid_min + g as u32)
    }
}
