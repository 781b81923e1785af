#![forbid(unsafe_code)]
//! slicewise-window: slice-based windowed aggregation.
//!
//! Records are folded into non-overlapping slices on the worker that sees
//! them. Closed slices meet in a staging area, get merged, and land in a
//! single global store that fires windows in order once every worker and
//! every origin has moved past them.
//!
//! Entry point: [`WindowOperator`], driven through the handler traits in
//! [`pipeline`].

pub mod action;
pub mod aggregation;
pub mod assigner;
pub mod definition;
pub mod error;
pub mod global;
pub mod manager;
pub mod metrics;
pub mod operator;
pub mod pipeline;
pub mod sink;
pub mod slice;
pub mod staging;
pub mod store;
pub mod trigger;
pub mod watermark;

pub use action::ActionDescriptor;
pub use aggregation::{Accumulator, Aggregation, PartialAggregate};
pub use assigner::{TimeRange, WindowAssigner};
pub use definition::{
    AggregateSpec, KeyExtractor, ShutdownPolicy, WindowDefinition, WindowOperatorConfig,
};
pub use error::{Result, WindowError};
pub use global::GlobalSliceStore;
pub use manager::WindowManager;
pub use metrics::{MetricsSnapshot, OperatorMetrics};
pub use operator::{WindowOperator, WorkerWindowState};
pub use pipeline::{
    ExecutablePipelineStage, HandlerError, OperatorHandler, PipelineContext, StageOutcome,
    TerminationMode, WorkerContext,
};
pub use sink::{CollectingSink, SinkError, WindowResult, WindowSink, WindowTriggerTask};
pub use slice::{ResultRow, Slice, SliceState, StateLayout};
pub use staging::{SliceMergeTask, SliceStaging, StagingRound};
pub use store::ThreadLocalSliceStore;
pub use trigger::{TriggerDecision, TriggerPolicy, WindowTrigger};
pub use watermark::MultiOriginWatermarkProcessor;
