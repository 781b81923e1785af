#![forbid(unsafe_code)]
//! slicewise-exec: the worker runtime that drives an executable pipeline stage.
//!
//! Workers are registered explicitly at start, each gets an OS thread and a
//! cooperative run-to-completion loop over either one shared work queue
//! (dynamic mode) or one pinned queue per worker (static mode). Producers
//! hand record batches in through the fixed-size buffer pool, so a slow
//! pipeline pushes back on them instead of growing memory.

pub mod error;
pub mod failpoints;
pub mod metrics;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod sinks;

pub use error::ExecError;
pub use registry::WorkerRegistry;
pub use runtime::{Producer, RunSummary, RunningPipeline, Runtime, WorkerReport};
pub use scheduler::WorkQueues;
pub use sinks::{ChannelSink, JsonLinesSink};
