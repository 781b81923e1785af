//! The window operator: ties the per-worker stores, the staging area and the
//! global slice store to the handler lifecycle.
//!
//! Ingestion touches only the calling worker's [`WorkerWindowState`]. When
//! the worker's trigger policy asks for an evaluation it hands its closed
//! slices to the staging area; if that completes a staging round, the same
//! worker merges the round and triggers windows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use slicewise_core::types::{Column, KeyValue, RowBatch};
use slicewise_mem::TupleBuffer;
use tracing::{debug, trace, warn};

use crate::definition::{KeyExtractor, ShutdownPolicy, WindowDefinition};
use crate::error::{Result, WindowError};
use crate::global::GlobalSliceStore;
use crate::manager::WindowManager;
use crate::metrics::{MetricsSnapshot, OperatorMetrics};
use crate::pipeline::{
    ExecutablePipelineStage, HandlerError, OperatorHandler, PipelineContext, StageOutcome,
    TerminationMode, WorkerContext,
};
use crate::sink::WindowSink;
use crate::slice::StateLayout;
use crate::staging::{SliceStaging, StagingRound};
use crate::store::ThreadLocalSliceStore;
use crate::trigger::WindowTrigger;
use crate::watermark::MultiOriginWatermarkProcessor;

/// Per-worker state, created in `open` and consumed in `close`.
#[derive(Debug)]
pub struct WorkerWindowState {
    store: ThreadLocalSliceStore,
    records_since_evaluation: u64,
}

impl WorkerWindowState {
    pub fn store(&self) -> &ThreadLocalSliceStore {
        &self.store
    }
}

struct DecodedRecord {
    ts: u64,
    key: Option<KeyValue>,
    inputs: Vec<Option<f64>>,
}

pub struct WindowOperator {
    definition: WindowDefinition,
    manager: Arc<WindowManager>,
    trigger: WindowTrigger,
    layout: StateLayout,
    watermarks: MultiOriginWatermarkProcessor,
    staging: OnceLock<SliceStaging>,
    global: GlobalSliceStore,
    metrics: Arc<OperatorMetrics>,
    started: AtomicBool,
}

impl WindowOperator {
    pub fn new(definition: WindowDefinition, sink: Arc<dyn WindowSink>) -> Result<Self> {
        definition.validate()?;
        let manager = Arc::new(WindowManager::new(
            definition.operator_id,
            definition.assigner,
            definition.allowed_lateness,
        ));
        let trigger = WindowTrigger::new(
            definition.trigger,
            definition.allowed_lateness.as_millis(),
            definition.emit_empty_windows,
        );
        let layout = definition.layout();
        let metrics = Arc::new(OperatorMetrics::default());
        let global = GlobalSliceStore::new(
            Arc::clone(&manager),
            trigger,
            definition.action,
            layout.clone(),
            sink,
            Arc::clone(&metrics),
        );
        Ok(Self {
            watermarks: MultiOriginWatermarkProcessor::new(&definition.origins)?,
            definition,
            manager,
            trigger,
            layout,
            staging: OnceLock::new(),
            global,
            metrics,
            started: AtomicBool::new(false),
        })
    }

    pub fn definition(&self) -> &WindowDefinition {
        &self.definition
    }

    pub fn manager(&self) -> &Arc<WindowManager> {
        &self.manager
    }

    pub fn global_store(&self) -> &GlobalSliceStore {
        &self.global
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Current global watermark.
    pub fn watermark(&self) -> u64 {
        self.watermarks.current()
    }

    fn staging(&self) -> Result<&SliceStaging> {
        self.staging
            .get()
            .ok_or_else(|| WindowError::Invariant("window operator used before setup".into()))
    }

    fn column<'a>(batch: &'a RowBatch, name: &str, role: &str) -> Result<&'a Column> {
        batch
            .column(name)
            .ok_or_else(|| WindowError::BufferAccess(format!("missing {role} column '{name}'")))
    }

    /// Resolve every record of the batch before touching any slice, so a bad
    /// buffer is dropped whole.
    fn decode(&self, batch: &RowBatch) -> Result<Vec<DecodedRecord>> {
        batch.validate()?;
        let def = &self.definition;
        let ts_col = Self::column(batch, &def.timestamp_field, "timestamp")?;
        let key_col = match &def.key {
            Some(KeyExtractor::Field(name)) => Some(Self::column(batch, name, "key")?),
            _ => None,
        };
        let input_cols = def
            .aggregates
            .iter()
            .map(|a| match a.function.input_column() {
                Some(name) => Self::column(batch, name, "aggregate input").map(Some),
                None => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(ts_col.len());
        for row in 0..ts_col.len() {
            let raw_ts = &ts_col.values[row];
            let ts = raw_ts.as_timestamp().ok_or_else(|| {
                WindowError::BufferAccess(format!(
                    "row {row}: timestamp {raw_ts:?} is not a non-negative integer"
                ))
            })?;
            let key = match (&def.key, key_col) {
                (Some(KeyExtractor::Custom { name, extract }), _) => {
                    Some(extract(batch, row).ok_or_else(|| {
                        WindowError::BufferAccess(format!("row {row}: key '{name}' not available"))
                    })?)
                }
                (_, Some(col)) => Some(KeyValue::from(&col.values[row])),
                _ => None,
            };
            let inputs = input_cols
                .iter()
                .map(|col| match col {
                    None => Ok(None),
                    Some(col) => {
                        let v = &col.values[row];
                        if v.is_null() {
                            Ok(None)
                        } else {
                            v.as_f64().map(Some).ok_or_else(|| {
                                WindowError::BufferAccess(format!(
                                    "row {row}: column '{}' holds non-numeric {v:?}",
                                    col.name
                                ))
                            })
                        }
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            out.push(DecodedRecord { ts, key, inputs });
        }
        Ok(out)
    }

    /// Hand closed slices to the staging area and merge whatever round that completes.
    fn evaluate(
        &self,
        local: &mut WorkerWindowState,
        worker: &WorkerContext,
        watermark: u64,
    ) -> Result<()> {
        local.records_since_evaluation = 0;
        let closing = self.manager.closing_watermark(watermark);
        if closing <= local.store.last_watermark() {
            return Ok(());
        }
        self.hand_over(local, worker, closing)
    }

    fn hand_over(
        &self,
        local: &mut WorkerWindowState,
        worker: &WorkerContext,
        closing: u64,
    ) -> Result<()> {
        let staging = self.staging()?;
        let closed = if closing == u64::MAX {
            local.store.drain_all()
        } else {
            local.store.drain_slices_until(closing)
        };
        local.store.set_last_watermark(closing);
        trace!(
            worker = worker.worker().get(),
            slices = closed.len(),
            closing,
            "handing over closed slices"
        );
        staging.add_slices(closed)?;
        if let Some(round) = staging.advance(worker.worker(), closing)? {
            self.merge_round(round)?;
        }
        Ok(())
    }

    fn merge_round(&self, round: StagingRound) -> Result<()> {
        let task_count = round.tasks.len() as u64;
        let merged = round
            .tasks
            .into_iter()
            .map(|task| {
                let range = task.range();
                self.definition
                    .action
                    .merge_slices(range, task.slices, &self.layout)
            })
            .collect::<Result<Vec<_>>>()?;
        self.metrics.add_merge_tasks(task_count);
        self.global
            .add_slices_and_trigger_windows(round.round, round.frontier, merged)?;
        Ok(())
    }
}

impl OperatorHandler for WindowOperator {
    type Local = WorkerWindowState;

    fn name(&self) -> &'static str {
        "window"
    }

    fn setup(&self, ctx: &PipelineContext) -> std::result::Result<(), HandlerError> {
        if ctx.num_workers() == 0 {
            return Err(WindowError::Config("pipeline has no workers".into()).into());
        }
        self.staging
            .set(SliceStaging::new(ctx.num_workers()))
            .map_err(|_| HandlerError::AlreadySetUp)?;
        debug!(
            operator = self.definition.operator_id.get(),
            workers = ctx.num_workers(),
            assigner = %self.definition.assigner,
            action = %self.definition.action,
            "window operator set up"
        );
        Ok(())
    }

    fn start(&self, _ctx: &PipelineContext) -> std::result::Result<(), HandlerError> {
        if self.staging.get().is_none() {
            return Err(HandlerError::NotSetUp);
        }
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn open(&self, worker: &WorkerContext) -> std::result::Result<WorkerWindowState, HandlerError> {
        if self.staging.get().is_none() {
            return Err(HandlerError::NotSetUp);
        }
        if !self.started.load(Ordering::Acquire) {
            return Err(HandlerError::NotStarted);
        }
        Ok(WorkerWindowState {
            store: ThreadLocalSliceStore::new(
                worker.worker(),
                self.definition.assigner,
                self.layout.clone(),
            ),
            records_since_evaluation: 0,
        })
    }

    fn close(
        &self,
        worker: &WorkerContext,
        mut local: WorkerWindowState,
    ) -> std::result::Result<(), HandlerError> {
        match self.definition.shutdown {
            ShutdownPolicy::Flush => {
                self.hand_over(&mut local, worker, u64::MAX)?;
            }
            ShutdownPolicy::Discard => {
                // Windows already closed by the watermark still go out.
                self.evaluate(&mut local, worker, self.watermarks.current())?;
                if !local.store.is_empty() {
                    debug!(
                        worker = worker.worker().get(),
                        slices = local.store.len(),
                        "discarding open slices"
                    );
                }
                if let Some(round) = self.staging()?.retire(worker.worker())? {
                    self.merge_round(round)?;
                }
            }
        }
        Ok(())
    }

    fn stop(&self, mode: TerminationMode) -> std::result::Result<(), HandlerError> {
        self.started.store(false, Ordering::Release);
        let flush = mode == TerminationMode::Graceful
            && self.definition.shutdown == ShutdownPolicy::Flush;
        if flush {
            // Retries windows whose emission failed earlier.
            self.global.trigger_all_inflight_windows()?;
        } else if mode == TerminationMode::Graceful {
            // Every worker has closed; whatever the watermark closed is final.
            let closing = self.manager.closing_watermark(self.watermarks.current());
            if let Some(round) = self.staging.get().and_then(|s| s.release_until(closing)) {
                self.merge_round(round)?;
            }
        }
        let staged = self.staging.get().map_or(0, SliceStaging::discard_all);
        let dropped = self.global.discard();
        if flush && staged > 0 {
            warn!(staged, "staged slices left after flush");
        }
        debug!(?mode, staged, dropped, "window operator stopped");
        Ok(())
    }
}

impl ExecutablePipelineStage for WindowOperator {
    fn execute(
        &self,
        local: &mut WorkerWindowState,
        worker: &WorkerContext,
        buffer: TupleBuffer,
    ) -> Result<StageOutcome> {
        let records = match self.decode(buffer.batch()) {
            Ok(records) => records,
            Err(e) => {
                self.metrics.buffer_dropped();
                return Err(e);
            }
        };

        let closing = self.manager.closing_watermark(self.watermarks.current());
        let mut late = 0u64;
        for rec in &records {
            if rec.ts < closing {
                late += 1;
                continue;
            }
            match local.store.find_or_create_slice_by_ts(rec.ts) {
                Ok(slice) => slice.update(rec.key.as_ref(), &rec.inputs, &self.layout)?,
                Err(WindowError::LateRecord { .. }) => late += 1,
                Err(e) => return Err(e),
            }
        }
        let ingested = records.len() as u64 - late;
        self.metrics.add_ingested(ingested);
        if late > 0 {
            self.metrics.add_late(late);
            warn!(
                worker = worker.worker().get(),
                late,
                closing,
                "dropped records behind the watermark"
            );
        }
        local.records_since_evaluation += ingested;

        let watermark = self.watermarks.update_watermark(
            buffer.origin(),
            buffer.sequence_number(),
            buffer.watermark(),
        )?;
        // Frees the pool slot before merging.
        drop(buffer);

        let advanced = self.manager.closing_watermark(watermark) > local.store.last_watermark();
        if self
            .trigger
            .should_evaluate(advanced, local.records_since_evaluation)
        {
            self.evaluate(local, worker, watermark)?;
        }
        Ok(StageOutcome {
            records: ingested,
            late_records: late,
            watermark,
            watermark_advanced: advanced,
        })
    }

    fn on_watermark(&self, local: &mut WorkerWindowState, worker: &WorkerContext) -> Result<()> {
        self.evaluate(local, worker, self.watermarks.current())
    }
}

impl std::fmt::Debug for WindowOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowOperator")
            .field("operator", &self.definition.operator_id)
            .field("assigner", &self.definition.assigner)
            .field("action", &self.definition.action)
            .finish_non_exhaustive()
    }
}
