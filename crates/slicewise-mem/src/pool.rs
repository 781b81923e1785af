//! Fixed-size record buffer pool built on top of the hard MemoryBudget.
//!
//! The pool owns a budget of exactly `slots * slot_bytes`. Each acquired
//! [`PoolSlot`] holds one slot's worth of bytes until dropped. When every slot
//! is in use, `acquire` blocks for a bounded time and then fails with
//! [`Error::PoolExhausted`]; that is the engine's backpressure signal.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use slicewise_core::budget::{BudgetGuard, MemoryBudget};
use slicewise_core::id::OriginId;
use slicewise_core::types::RowBatch;

use crate::buffer::TupleBuffer;
use crate::error::{Error, Result};
use crate::guard::{BudgetGuardImpl, MemoryBudgetImpl};
use crate::tracking::{PoolCounters, PoolStats};

const SLOT_TAG: &str = "tuple-buffer";

struct PoolInner {
    budget: MemoryBudgetImpl,
    slot_bytes: usize,
    slots: usize,
    wait: Duration,
    lock: Mutex<()>,
    released: Condvar,
    counters: PoolCounters,
}

impl PoolInner {
    fn try_take(&self) -> Option<BudgetGuardImpl> {
        self.budget.try_acquire(self.slot_bytes, SLOT_TAG)
    }
}

/// Bounded pool of record buffer slots.
#[derive(Clone)]
pub struct FixedSizeBufferPool {
    inner: Arc<PoolInner>,
}

impl FixedSizeBufferPool {
    /// Create a pool with its own budget of `slots * slot_bytes`.
    pub fn new(slots: usize, slot_bytes: usize, wait: Duration) -> Result<Self> {
        if slots == 0 || slot_bytes == 0 {
            return Err(Error::InvalidConfig(format!(
                "pool needs at least one non-empty slot (slots={slots}, slot_bytes={slot_bytes})"
            )));
        }
        let capacity = slots.checked_mul(slot_bytes).ok_or_else(|| {
            Error::InvalidConfig("slots * slot_bytes overflows usize".to_string())
        })?;
        Ok(Self::build(MemoryBudgetImpl::new(capacity), slot_bytes, wait))
    }

    /// Carve slots out of an existing budget; the slot count is however many
    /// `slot_bytes` fit in its capacity.
    pub fn with_budget(budget: MemoryBudgetImpl, slot_bytes: usize, wait: Duration) -> Result<Self> {
        if slot_bytes == 0 || !budget.fits(slot_bytes) {
            return Err(Error::BudgetExceeded {
                tag: SLOT_TAG,
                requested: slot_bytes,
                capacity: budget.capacity_bytes(),
                used: budget.used_bytes(),
            });
        }
        Ok(Self::build(budget, slot_bytes, wait))
    }

    fn build(budget: MemoryBudgetImpl, slot_bytes: usize, wait: Duration) -> Self {
        let slots = budget.capacity_bytes() / slot_bytes;
        Self {
            inner: Arc::new(PoolInner {
                budget,
                slot_bytes,
                slots,
                wait,
                lock: Mutex::new(()),
                released: Condvar::new(),
                counters: PoolCounters::default(),
            }),
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<PoolSlot> {
        let guard = self.inner.try_take()?;
        self.inner.counters.acquired.fetch_add(1, Ordering::Relaxed);
        Some(self.slot(guard))
    }

    /// Take a slot, blocking up to the configured wait when the pool is exhausted.
    pub fn acquire(&self) -> Result<PoolSlot> {
        if let Some(slot) = self.try_acquire() {
            return Ok(slot);
        }

        self.inner.counters.waited.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "tracing")]
        tracing::trace!(slots = self.inner.slots, "buffer pool exhausted; waiting");

        let started = Instant::now();
        let deadline = started + self.inner.wait;
        let mut lock = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            // Checked under the lock so a release between the check and the
            // wait cannot be missed.
            if let Some(guard) = self.inner.try_take() {
                drop(lock);
                self.inner.counters.acquired.fetch_add(1, Ordering::Relaxed);
                return Ok(self.slot(guard));
            }
            let now = Instant::now();
            if now >= deadline {
                self.inner.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    slots = self.inner.slots,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "buffer pool exhausted"
                );
                return Err(Error::PoolExhausted {
                    slots: self.inner.slots,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            let (next, _) = self
                .inner
                .released
                .wait_timeout(lock, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            lock = next;
        }
    }

    /// Acquire a slot and wrap `batch` into a pooled buffer.
    pub fn acquire_buffer(
        &self,
        batch: RowBatch,
        origin: OriginId,
        sequence_number: u64,
        watermark: u64,
    ) -> Result<TupleBuffer> {
        let slot = self.acquire()?;
        Ok(TupleBuffer::new(batch, origin, sequence_number, watermark, slot))
    }

    fn slot(&self, guard: BudgetGuardImpl) -> PoolSlot {
        PoolSlot {
            guard: Some(guard),
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots
    }

    pub fn slot_bytes(&self) -> usize {
        self.inner.slot_bytes
    }

    /// Slots currently handed out (advisory).
    pub fn in_use(&self) -> usize {
        self.inner.budget.used_bytes() / self.inner.slot_bytes
    }

    pub fn available(&self) -> usize {
        self.inner.slots.saturating_sub(self.in_use())
    }

    /// Highest number of slots simultaneously in use.
    pub fn peak_in_use(&self) -> usize {
        self.inner.budget.peak_bytes() / self.inner.slot_bytes
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.counters.snapshot()
    }
}

impl std::fmt::Debug for FixedSizeBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedSizeBufferPool")
            .field("slots", &self.inner.slots)
            .field("slot_bytes", &self.inner.slot_bytes)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// One occupied pool slot. Dropping it frees the slot and wakes a waiter.
pub struct PoolSlot {
    guard: Option<BudgetGuardImpl>,
    pool: Arc<PoolInner>,
}

impl PoolSlot {
    pub fn bytes(&self) -> usize {
        self.guard.as_ref().map(|g| g.bytes()).unwrap_or(0)
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        drop(self.guard.take());
        let _lock = self.pool.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.pool.released.notify_one();
    }
}

impl std::fmt::Debug for PoolSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSlot").field("bytes", &self.bytes()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn slots_are_bounded_and_returned_on_drop() {
        let pool = FixedSizeBufferPool::new(2, 128, Duration::from_millis(10)).expect("pool");
        let a = pool.try_acquire().expect("slot a");
        let _b = pool.try_acquire().expect("slot b");
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_use(), 2);
        drop(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_some());
        assert_eq!(pool.peak_in_use(), 2);
    }

    #[test]
    fn exhausted_pool_fails_after_bounded_wait() {
        let pool = FixedSizeBufferPool::new(1, 64, Duration::from_millis(20)).expect("pool");
        let _held = pool.acquire().expect("first slot");
        let started = Instant::now();
        let err = pool.acquire().expect_err("pool is exhausted");
        assert!(matches!(err, Error::PoolExhausted { slots: 1, .. }));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(pool.stats().exhausted, 1);
    }

    #[test]
    fn waiter_wakes_when_slot_is_released() {
        let pool = FixedSizeBufferPool::new(1, 64, Duration::from_secs(5)).expect("pool");
        let held = pool.acquire().expect("first slot");
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|s| s.bytes()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        let bytes = waiter.join().expect("join").expect("acquired after release");
        assert_eq!(bytes, 64);
    }

    #[test]
    fn pool_from_shared_budget_counts_whole_slots() {
        let budget = MemoryBudgetImpl::new(1000);
        let pool = FixedSizeBufferPool::with_budget(budget, 300, Duration::ZERO).expect("pool");
        assert_eq!(pool.capacity(), 3);
        assert!(FixedSizeBufferPool::with_budget(MemoryBudgetImpl::new(10), 300, Duration::ZERO)
            .is_err());
    }

    #[test]
    fn zero_slot_pool_is_rejected() {
        assert!(matches!(
            FixedSizeBufferPool::new(0, 10, Duration::ZERO),
            Err(Error::InvalidConfig(_))
        ));
    }
}
