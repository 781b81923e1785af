//! Work queues between producers and worker threads.
//!
//! Dynamic mode shares one bounded MPMC channel among all workers; any idle
//! worker takes the next buffer. Static mode gives every worker its own
//! bounded channel and pins each origin to one worker (`origin % workers`),
//! which keeps an origin's buffers in submission order.

use crossbeam_channel::{bounded, Receiver, Sender};
use slicewise_core::config::ExecutionMode;
use slicewise_core::id::OriginId;
use slicewise_mem::TupleBuffer;

use crate::error::ExecError;

/// The sending half of the work queues. Cloning it adds a producer; workers
/// see the queues disconnect once every clone is dropped.
#[derive(Debug, Clone)]
pub struct WorkQueues {
    mode: ExecutionMode,
    senders: Vec<Sender<TupleBuffer>>,
}

impl WorkQueues {
    /// Build the queues for `workers` workers. Returns the sending half and
    /// one receiver per worker, indexed by worker id.
    pub fn new(
        mode: ExecutionMode,
        workers: usize,
        capacity: usize,
    ) -> (Self, Vec<Receiver<TupleBuffer>>) {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        match mode {
            ExecutionMode::Dynamic => {
                let (tx, rx) = bounded(capacity);
                let receivers = (0..workers).map(|_| rx.clone()).collect();
                (
                    Self {
                        mode,
                        senders: vec![tx],
                    },
                    receivers,
                )
            }
            ExecutionMode::Static => {
                let (senders, receivers): (Vec<_>, Vec<_>) =
                    (0..workers).map(|_| bounded(capacity)).unzip();
                (Self { mode, senders }, receivers)
            }
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Index of the queue buffers from `origin` go to.
    pub fn route(&self, origin: OriginId) -> usize {
        match self.mode {
            ExecutionMode::Dynamic => 0,
            ExecutionMode::Static => (origin.get() % self.senders.len() as u64) as usize,
        }
    }

    /// Enqueue a buffer, blocking while its queue is full.
    pub fn dispatch(&self, buffer: TupleBuffer) -> Result<(), ExecError> {
        let idx = self.route(buffer.origin());
        self.senders[idx]
            .send(buffer)
            .map_err(|_| ExecError::Stopped)
    }

    /// Buffers waiting across all queues.
    pub fn queued(&self) -> usize {
        self.senders.iter().map(Sender::len).sum()
    }
}
