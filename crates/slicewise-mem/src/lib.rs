#![forbid(unsafe_code)]
//! slicewise-mem: hard memory budgeting and the record buffer pool.
//!
//! This crate provides the concrete implementations of the interfaces in
//! `slicewise_core::budget`. Every record buffer handed to a worker holds a
//! pool slot, and every slot holds a budget guard, so the number of in-flight
//! buffers can never exceed the configured memory cap.

pub mod buffer;
pub mod error;
pub mod guard;
pub mod pool;
pub mod tracking;

pub use buffer::TupleBuffer;
pub use guard::{BudgetGuardImpl, MemoryBudgetImpl};
pub use pool::{FixedSizeBufferPool, PoolSlot};
pub use tracking::{PeakTracker, PoolStats};
