//! Memory cap traits.
//!
//! `slicewise-mem` implements these and the record buffer pool charges every
//! slot against them. Keeping the traits here lets config and tests name the
//! API without depending on the pool.

/// Proof that `bytes()` bytes are charged against a budget. Dropping it
/// returns them. Pooled buffers move from the producer to a worker thread,
/// so guards are `Send`.
pub trait BudgetGuard: Send {
    fn bytes(&self) -> usize;

    /// Who holds the charge, for tracing.
    fn tag(&self) -> &'static str {
        "guard"
    }
}

/// A hard memory cap.
///
/// `try_acquire` never over-commits: `None` means the cap is reached and the
/// caller has to wait for a release or give up.
pub trait MemoryBudget: Send + Sync + 'static {
    type Guard: BudgetGuard;

    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard>;

    fn capacity_bytes(&self) -> usize;

    /// Bytes charged right now. Advisory only; it may be stale by the time it is read.
    fn used_bytes(&self) -> usize;

    /// Whether a request of `bytes` could ever succeed against this cap.
    fn fits(&self, bytes: usize) -> bool {
        bytes <= self.capacity_bytes()
    }
}
