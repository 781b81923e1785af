//! Operator handler interfaces between the execution substrate and the
//! window operator.
//!
//! The runtime calls `setup` and `start` once, `open`/`close` once per worker,
//! `execute` for each buffer a worker picks up, and `stop` at the end. Every
//! lifecycle hook reports a status code: `0` is success; anything else is a
//! recoverable failure the runtime logs and may retry.

use slicewise_core::id::WorkerId;
use slicewise_mem::TupleBuffer;
use thiserror::Error;

use crate::error::WindowError;

pub const STATUS_OK: i32 = 0;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("operator is already set up")]
    AlreadySetUp,

    #[error("operator is not set up")]
    NotSetUp,

    #[error("operator is not started")]
    NotStarted,

    #[error(transparent)]
    Window(#[from] WindowError),
}

impl HandlerError {
    /// Non-zero status code for this failure.
    pub fn status_code(&self) -> i32 {
        match self {
            HandlerError::AlreadySetUp => 1,
            HandlerError::NotSetUp => 2,
            HandlerError::NotStarted => 3,
            HandlerError::Window(e) if e.is_fatal() => 10,
            HandlerError::Window(_) => 11,
        }
    }
}

/// Status code of a lifecycle call.
pub fn status_code<T>(result: &Result<T, HandlerError>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.status_code(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationMode {
    /// Drain queued buffers, close workers, then stop.
    Graceful,
    /// Stop now and drop in-flight data.
    Hard,
}

/// Pipeline-wide facts known at setup.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    num_workers: usize,
}

impl PipelineContext {
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }
}

/// Identity of the worker a call runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    worker: WorkerId,
}

impl WorkerContext {
    pub fn new(worker: WorkerId) -> Self {
        Self { worker }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }
}

/// What one `execute` call observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageOutcome {
    pub records: u64,
    pub late_records: u64,
    /// Global watermark after this buffer.
    pub watermark: u64,
    /// The lateness-adjusted watermark moved past what this worker had closed.
    pub watermark_advanced: bool,
}

pub trait OperatorHandler: Send + Sync + 'static {
    /// Worker-owned state created in `open` and consumed by `close`.
    type Local: Send;

    fn name(&self) -> &'static str;

    fn setup(&self, ctx: &PipelineContext) -> Result<(), HandlerError>;

    fn start(&self, ctx: &PipelineContext) -> Result<(), HandlerError>;

    fn open(&self, worker: &WorkerContext) -> Result<Self::Local, HandlerError>;

    fn close(&self, worker: &WorkerContext, local: Self::Local) -> Result<(), HandlerError>;

    fn stop(&self, mode: TerminationMode) -> Result<(), HandlerError>;
}

/// A compiled pipeline stage that consumes buffers on worker threads.
pub trait ExecutablePipelineStage: OperatorHandler {
    fn execute(
        &self,
        local: &mut Self::Local,
        worker: &WorkerContext,
        buffer: TupleBuffer,
    ) -> Result<StageOutcome, WindowError>;

    /// The global watermark moved without this worker seeing a buffer.
    fn on_watermark(&self, local: &mut Self::Local, worker: &WorkerContext)
        -> Result<(), WindowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(status_code::<()>(&Ok(())), STATUS_OK);
        assert_eq!(status_code::<()>(&Err(HandlerError::NotSetUp)), 2);
        let fatal = HandlerError::from(WindowError::Invariant("x".into()));
        assert_eq!(fatal.status_code(), 10);
        let late = HandlerError::from(WindowError::LateRecord { ts: 1, watermark: 2 });
        assert_eq!(late.status_code(), 11);
    }
}
