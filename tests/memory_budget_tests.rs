//! Buffer pool and memory budget enforcement tests

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use slicewise_core::budget::MemoryBudget;
use slicewise_core::id::OriginId;
use slicewise_core::types::{Column, RowBatch, Scalar};
use slicewise_mem::error::Error;
use slicewise_mem::{FixedSizeBufferPool, MemoryBudgetImpl};

fn batch(ts: u64) -> RowBatch {
    RowBatch::new(vec![Column::new("ts", vec![Scalar::U64(ts)])])
}

#[test]
fn test_pool_exhaustion_is_reported_after_bounded_wait() {
    let pool = FixedSizeBufferPool::new(2, 1024, Duration::from_millis(20)).expect("pool");
    let first = pool
        .acquire_buffer(batch(1), OriginId::new(0), 1, 0)
        .expect("first");
    let _second = pool
        .acquire_buffer(batch(2), OriginId::new(0), 2, 0)
        .expect("second");
    assert_eq!(pool.in_use(), 2);
    assert_eq!(pool.available(), 0);

    match pool.acquire_buffer(batch(3), OriginId::new(0), 3, 0) {
        Err(Error::PoolExhausted { slots, .. }) => assert_eq!(slots, 2),
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(pool.stats().exhausted, 1);

    // Returning a buffer frees its slot for the next producer.
    drop(first);
    let third = pool
        .acquire_buffer(batch(3), OriginId::new(0), 3, 0)
        .expect("slot freed");
    assert_eq!(third.sequence_number(), 3);
    assert_eq!(pool.peak_in_use(), 2);
}

#[test]
fn test_blocked_producer_resumes_when_a_slot_frees() {
    let pool = FixedSizeBufferPool::new(1, 1024, Duration::from_secs(5)).expect("pool");
    let held = pool.acquire().expect("slot");

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|slot| slot.bytes()))
    };
    thread::sleep(Duration::from_millis(20));
    drop(held);

    let bytes = waiter.join().expect("join").expect("acquired");
    assert_eq!(bytes, 1024);
}

#[test]
fn test_pool_accounts_against_shared_budget() {
    let budget = MemoryBudgetImpl::new(4096);
    let pool = FixedSizeBufferPool::with_budget(budget.clone(), 1024, Duration::from_millis(5))
        .expect("pool");
    assert_eq!(pool.capacity(), 4);

    let slots: Vec<_> = (0..4).map(|_| pool.try_acquire().expect("slot")).collect();
    assert_eq!(budget.used_bytes(), 4096);
    assert!(pool.try_acquire().is_none());
    assert!(budget.try_acquire(1, "other").is_none());

    drop(slots);
    assert_eq!(budget.used_bytes(), 0);
}

#[test]
fn test_concurrent_acquire_never_exceeds_capacity() {
    let pool = Arc::new(FixedSizeBufferPool::new(3, 512, Duration::from_secs(5)).expect("pool"));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for seq in 0..50 {
                    let buf = pool
                        .acquire_buffer(batch(seq), OriginId::new(i), seq + 1, 0)
                        .expect("acquire");
                    assert!(pool.in_use() <= 3);
                    drop(buf);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }
    assert_eq!(pool.in_use(), 0);
    assert!(pool.peak_in_use() <= 3);
    assert_eq!(pool.stats().acquired, 400);
}
