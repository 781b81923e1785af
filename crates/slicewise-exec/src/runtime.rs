//! Runtime: register workers, run the handler lifecycle, and drive buffers
//! through an [`ExecutablePipelineStage`] on worker threads.
//!
//! Behavior:
//! - Workers are registered up front; worker `i` gets id `i` and a thread
//!   named `slicewise-worker-{i}`.
//! - `setup`, `start` and each worker's `open` are retried up to
//!   `lifecycle_retries` times on a recoverable (non-zero status) failure.
//! - A worker whose buffer advances the watermark nudges the other workers,
//!   so idle workers still hand over their closed slices.
//! - Buffer errors drop the buffer; emission errors are escalated; fatal
//!   errors abort the whole pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{Builder, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use slicewise_core::config::EngineConfig;
use slicewise_core::id::{OriginId, WorkerId};
use slicewise_core::types::RowBatch;
use slicewise_mem::{FixedSizeBufferPool, PoolStats, TupleBuffer};
use slicewise_window::pipeline::{
    status_code, ExecutablePipelineStage, HandlerError, PipelineContext, TerminationMode,
    WorkerContext,
};
use slicewise_window::WindowError;

use crate::error::ExecError;
use crate::fail_point;
use crate::metrics::emit_span;
use crate::registry::WorkerRegistry;
use crate::scheduler::WorkQueues;

const WORKER_PREFIX: &str = "slicewise-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    /// The global watermark moved; evaluate even without a buffer.
    Watermark,
    /// Leave the loop without closing.
    Stop,
}

/// One slot per worker: a pending message already wakes the worker, so
/// further nudges coalesce into it. Stop is carried by the halt flag, which
/// the loop re-checks after every wake-up.
fn control_channel() -> (Sender<Control>, Receiver<Control>) {
    bounded(1)
}

fn signal(peer: &Sender<Control>, msg: Control) {
    let _ = peer.try_send(msg);
}

/// Shared failure state. The first fatal reason wins.
#[derive(Debug, Default)]
struct Supervisor {
    halted: AtomicBool,
    fatal: Mutex<Option<String>>,
    escalations: Mutex<Vec<String>>,
}

impl Supervisor {
    fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    fn abort(&self, reason: String) {
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if fatal.is_none() {
            *fatal = Some(reason);
        }
        self.halt();
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn fatal(&self) -> Option<String> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn escalate(&self, message: String) {
        self.escalations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    fn escalations(&self) -> Vec<String> {
        self.escalations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Run a lifecycle hook, retrying recoverable failures.
fn with_retries<T>(
    hook: &'static str,
    retries: usize,
    mut call: impl FnMut() -> Result<T, HandlerError>,
) -> Result<T, ExecError> {
    let mut attempt = 0;
    loop {
        let result = call();
        let code = status_code(&result);
        match result {
            Ok(v) => {
                trace!(hook, code, attempt, "lifecycle hook done");
                return Ok(v);
            }
            Err(e) => {
                let retryable = match &e {
                    HandlerError::AlreadySetUp => false,
                    HandlerError::Window(w) => !w.is_fatal(),
                    HandlerError::NotSetUp | HandlerError::NotStarted => true,
                };
                if !retryable || attempt >= retries {
                    error!(hook, code, attempt, error = %e, "lifecycle hook failed");
                    return Err(ExecError::Handler {
                        hook,
                        code,
                        message: e.to_string(),
                    });
                }
                attempt += 1;
                warn!(hook, code, attempt, error = %e, "lifecycle hook failed; retrying");
            }
        }
    }
}

/// What one worker did before it exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker: WorkerId,
    pub buffers: u64,
    pub records: u64,
    pub late_records: u64,
    /// Buffers dropped because they could not be decoded.
    pub failed_buffers: u64,
    pub watermark_ticks: u64,
    /// False when the worker stopped without closing (hard stop or abort).
    pub closed: bool,
}

impl WorkerReport {
    fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            buffers: 0,
            records: 0,
            late_records: 0,
            failed_buffers: 0,
            watermark_ticks: 0,
            closed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub workers: Vec<WorkerReport>,
    /// Per-window failures that were reported but did not stop the run.
    pub escalations: Vec<String>,
    pub pool: PoolStats,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn buffers(&self) -> u64 {
        self.workers.iter().map(|w| w.buffers).sum()
    }

    pub fn records(&self) -> u64 {
        self.workers.iter().map(|w| w.records).sum()
    }

    pub fn late_records(&self) -> u64 {
        self.workers.iter().map(|w| w.late_records).sum()
    }

    pub fn failed_buffers(&self) -> u64 {
        self.workers.iter().map(|w| w.failed_buffers).sum()
    }
}

struct Worker<S: ExecutablePipelineStage> {
    stage: Arc<S>,
    ctx: WorkerContext,
    data: Receiver<TupleBuffer>,
    control: Receiver<Control>,
    peers: Arc<Vec<Sender<Control>>>,
    supervisor: Arc<Supervisor>,
    retries: usize,
}

impl<S: ExecutablePipelineStage> Worker<S> {
    fn id(&self) -> u64 {
        self.ctx.worker().get()
    }

    fn run(self) -> WorkerReport {
        let mut report = WorkerReport::new(self.ctx.worker());
        let mut local = match with_retries("open", self.retries, || self.stage.open(&self.ctx)) {
            Ok(local) => local,
            Err(e) => {
                self.abort(e.to_string());
                return report;
            }
        };

        let mut drained = false;
        while !self.supervisor.is_halted() {
            select! {
                recv(self.control) -> msg => match msg {
                    Ok(Control::Watermark) => {
                        report.watermark_ticks += 1;
                        if let Err(e) = self.stage.on_watermark(&mut local, &self.ctx) {
                            if self.handle(e, &mut report) {
                                break;
                            }
                        }
                    }
                    Ok(Control::Stop) | Err(_) => break,
                },
                recv(self.data) -> msg => match msg {
                    Ok(buffer) => {
                        fail_point!("worker.execute");
                        report.buffers += 1;
                        match self.stage.execute(&mut local, &self.ctx, buffer) {
                            Ok(outcome) => {
                                report.records += outcome.records;
                                report.late_records += outcome.late_records;
                                if outcome.watermark_advanced {
                                    self.nudge_peers();
                                }
                            }
                            Err(e) => {
                                if self.handle(e, &mut report) {
                                    break;
                                }
                            }
                        }
                    }
                    Err(_) => {
                        drained = true;
                        break;
                    }
                },
            }
        }

        if drained && !self.supervisor.is_halted() {
            fail_point!("worker.close");
            let result = self.stage.close(&self.ctx, local);
            let code = status_code(&result);
            match result {
                Ok(()) => report.closed = true,
                Err(HandlerError::Window(e)) if !e.is_fatal() => {
                    error!(worker = self.id(), code, error = %e, "close failed; escalating");
                    self.supervisor.escalate(e.to_string());
                    report.closed = true;
                }
                Err(e) => {
                    error!(worker = self.id(), code, error = %e, "close failed");
                    self.abort(e.to_string());
                }
            }
        } else {
            debug!(worker = self.id(), "worker stopped without closing");
            drop(local);
        }

        emit_span(
            "worker_exit",
            &[
                ("worker", self.id().to_string()),
                ("buffers", report.buffers.to_string()),
                ("records", report.records.to_string()),
                ("late_records", report.late_records.to_string()),
            ],
        );
        report
    }

    /// Apply the error policy. Returns true when the worker must stop.
    fn handle(&self, e: WindowError, report: &mut WorkerReport) -> bool {
        if e.is_buffer_error() {
            report.failed_buffers += 1;
            warn!(worker = self.id(), error = %e, "dropped undecodable buffer");
            false
        } else if e.is_fatal() {
            error!(worker = self.id(), error = %e, "fatal window error; aborting pipeline");
            self.abort(e.to_string());
            true
        } else {
            error!(worker = self.id(), error = %e, "window error escalated");
            self.supervisor.escalate(e.to_string());
            false
        }
    }

    fn abort(&self, reason: String) {
        self.supervisor.abort(reason);
        for peer in self.peers.iter() {
            signal(peer, Control::Stop);
        }
    }

    fn nudge_peers(&self) {
        let me = self.ctx.worker().index();
        for (i, peer) in self.peers.iter().enumerate() {
            if i != me {
                signal(peer, Control::Watermark);
            }
        }
    }
}

/// Submits record batches into a running pipeline. Cheap to clone; a
/// graceful stop completes once every clone has been dropped.
#[derive(Debug, Clone)]
pub struct Producer {
    pool: FixedSizeBufferPool,
    queues: WorkQueues,
    supervisor: Arc<Supervisor>,
}

impl Producer {
    /// Wrap `batch` in a pooled buffer and enqueue it. Blocks for at most the
    /// pool's wait timeout when every buffer is in use, then fails with
    /// [`slicewise_mem::error::Error::PoolExhausted`].
    pub fn submit(
        &self,
        origin: OriginId,
        sequence_number: u64,
        watermark: u64,
        batch: RowBatch,
    ) -> Result<(), ExecError> {
        if self.supervisor.is_halted() {
            return Err(ExecError::Aborted(
                self.supervisor
                    .fatal()
                    .unwrap_or_else(|| "pipeline halted".to_string()),
            ));
        }
        let buffer = self
            .pool
            .acquire_buffer(batch, origin, sequence_number, watermark)?;
        self.queues.dispatch(buffer)
    }
}

/// Owns the configuration, the stage and the buffer pool until `start`.
pub struct Runtime<S: ExecutablePipelineStage> {
    cfg: EngineConfig,
    stage: Arc<S>,
    pool: FixedSizeBufferPool,
}

impl<S: ExecutablePipelineStage> Runtime<S> {
    pub fn new(cfg: EngineConfig, stage: Arc<S>) -> Result<Self, ExecError> {
        cfg.validate()?;
        let pool = FixedSizeBufferPool::new(
            cfg.buffer_pool_slots,
            cfg.buffer_slot_bytes,
            Duration::from_millis(cfg.buffer_acquire_timeout_ms),
        )?;
        Ok(Self { cfg, stage, pool })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn pool(&self) -> &FixedSizeBufferPool {
        &self.pool
    }

    /// Register workers, run `setup`/`start`, and spawn the worker threads.
    pub fn start(self) -> Result<RunningPipeline<S>, ExecError> {
        let Runtime { cfg, stage, pool } = self;
        let retries = cfg.lifecycle_retries;
        let registry = WorkerRegistry::with_workers(WORKER_PREFIX, cfg.num_workers);
        let pipeline = PipelineContext::new(registry.len());

        with_retries("setup", retries, || stage.setup(&pipeline))?;
        with_retries("start", retries, || stage.start(&pipeline))?;

        let (queues, receivers) =
            WorkQueues::new(cfg.execution_mode, registry.len(), cfg.queue_capacity);
        let (controls, control_rx): (Vec<_>, Vec<_>) =
            (0..registry.len()).map(|_| control_channel()).unzip();
        let peers = Arc::new(controls);
        let supervisor = Arc::new(Supervisor::default());

        let mut handles = Vec::with_capacity(registry.len());
        for ((worker, data), control) in registry.workers().zip(receivers).zip(control_rx) {
            let name = registry.name(worker).unwrap_or(WORKER_PREFIX).to_string();
            let w = Worker {
                stage: Arc::clone(&stage),
                ctx: WorkerContext::new(worker),
                data,
                control,
                peers: Arc::clone(&peers),
                supervisor: Arc::clone(&supervisor),
                retries,
            };
            match Builder::new().name(name).spawn(move || w.run()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(worker = worker.get(), error = %e, "failed to spawn worker");
                    supervisor.abort(e.to_string());
                    for peer in peers.iter() {
                        signal(peer, Control::Stop);
                    }
                    drop(queues);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    let _ = stage.stop(TerminationMode::Hard);
                    return Err(ExecError::Spawn(e));
                }
            }
        }

        info!(
            workers = registry.len(),
            mode = ?cfg.execution_mode,
            pool_slots = pool.capacity(),
            "pipeline started"
        );
        Ok(RunningPipeline {
            stage,
            producer: Producer {
                pool,
                queues,
                supervisor: Arc::clone(&supervisor),
            },
            peers,
            handles,
            supervisor,
            retries,
            started: Instant::now(),
        })
    }
}

/// A started pipeline. Feed it with [`RunningPipeline::submit`] or with
/// [`Producer`] clones from other threads, then [`RunningPipeline::stop`] it.
pub struct RunningPipeline<S: ExecutablePipelineStage> {
    stage: Arc<S>,
    producer: Producer,
    peers: Arc<Vec<Sender<Control>>>,
    handles: Vec<JoinHandle<WorkerReport>>,
    supervisor: Arc<Supervisor>,
    retries: usize,
    started: Instant,
}

impl<S: ExecutablePipelineStage> RunningPipeline<S> {
    pub fn submit(
        &self,
        origin: OriginId,
        sequence_number: u64,
        watermark: u64,
        batch: RowBatch,
    ) -> Result<(), ExecError> {
        self.producer
            .submit(origin, sequence_number, watermark, batch)
    }

    pub fn producer(&self) -> Producer {
        self.producer.clone()
    }

    pub fn stage(&self) -> &Arc<S> {
        &self.stage
    }

    pub fn pool(&self) -> &FixedSizeBufferPool {
        &self.producer.pool
    }

    /// True once a fatal error aborted the pipeline.
    pub fn is_aborted(&self) -> bool {
        self.supervisor.fatal().is_some()
    }

    /// Stop the pipeline.
    ///
    /// `Graceful` lets the workers drain every queued buffer and close (which
    /// flushes or discards open slices per the stage's shutdown policy); it
    /// waits for outstanding [`Producer`] clones to be dropped. `Hard` stops
    /// the workers at their next loop iteration and drops in-flight data.
    pub fn stop(self, mode: TerminationMode) -> Result<RunSummary, ExecError> {
        let RunningPipeline {
            stage,
            producer,
            peers,
            handles,
            supervisor,
            retries,
            started,
        } = self;
        let pool = producer.pool.clone();

        if mode == TerminationMode::Hard {
            supervisor.halt();
            for peer in peers.iter() {
                signal(peer, Control::Stop);
            }
        }
        drop(producer);

        let mut workers = Vec::with_capacity(handles.len());
        let mut panicked = None;
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(report) => workers.push(report),
                Err(_) => {
                    error!(worker = i, "worker panicked");
                    panicked.get_or_insert(i);
                }
            }
        }

        let fatal = supervisor.fatal();
        let mode = if panicked.is_some() || fatal.is_some() {
            TerminationMode::Hard
        } else {
            mode
        };
        with_retries("stop", retries, || stage.stop(mode))?;

        if let Some(worker) = panicked {
            return Err(ExecError::WorkerPanic(worker));
        }
        if let Some(reason) = fatal {
            return Err(ExecError::Aborted(reason));
        }

        let summary = RunSummary {
            workers,
            escalations: supervisor.escalations(),
            pool: pool.stats(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        emit_span(
            "pipeline_stop",
            &[
                ("mode", format!("{mode:?}")),
                ("buffers", summary.buffers().to_string()),
                ("records", summary.records().to_string()),
                ("elapsed_ms", summary.elapsed_ms.to_string()),
            ],
        );
        info!(
            ?mode,
            buffers = summary.buffers(),
            records = summary.records(),
            late_records = summary.late_records(),
            escalations = summary.escalations.len(),
            "pipeline stopped"
        );
        Ok(summary)
    }
}
