//! Runtime configuration that downstream crates can serialize/deserialize.
//!
//! Per-operator settings (window size, trigger, aggregates) live with the
//! window operator; this struct only covers the execution substrate.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How buffers are distributed over worker threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One shared MPMC queue; any idle worker takes the next buffer.
    #[default]
    Dynamic,
    /// One queue per worker; buffers of an origin are pinned to one worker.
    Static,
}

impl std::str::FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dynamic" => Ok(ExecutionMode::Dynamic),
            "static" => Ok(ExecutionMode::Static),
            other => Err(Error::Config(format!("unknown execution mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads. Each one owns a thread-local slice store.
    pub num_workers: usize,

    pub execution_mode: ExecutionMode,

    /// Capacity of each work queue (buffers waiting for a worker).
    pub queue_capacity: usize,

    /// Number of record buffers in the fixed-size pool.
    pub buffer_pool_slots: usize,

    /// Bytes accounted per pooled buffer.
    pub buffer_slot_bytes: usize,

    /// How long a producer may block on an exhausted pool before failing.
    pub buffer_acquire_timeout_ms: u64,

    /// Hard memory cap (in bytes). The pool never accounts more than this.
    pub mem_cap_bytes: usize,

    /// How many times a failing lifecycle hook (setup/start/open) is retried.
    pub lifecycle_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            execution_mode: ExecutionMode::Dynamic,
            queue_capacity: 256,
            buffer_pool_slots: 1024,
            buffer_slot_bytes: 64 * 1024, // 64 KiB per buffer
            buffer_acquire_timeout_ms: 5_000,
            mem_cap_bytes: 512 * 1024 * 1024, // 512 MiB default
            lifecycle_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SLICEWISE_NUM_WORKERS`: worker thread count
    /// - `SLICEWISE_EXECUTION_MODE`: `dynamic` or `static`
    /// - `SLICEWISE_QUEUE_CAPACITY`: per-queue capacity
    /// - `SLICEWISE_BUFFER_POOL_SLOTS`: pooled buffer count
    /// - `SLICEWISE_BUFFER_SLOT_BYTES`: bytes per pooled buffer
    /// - `SLICEWISE_BUFFER_ACQUIRE_TIMEOUT_MS`: bounded wait on an exhausted pool
    /// - `SLICEWISE_MEM_CAP_BYTES`: memory cap in bytes
    /// - `SLICEWISE_LIFECYCLE_RETRIES`: lifecycle hook retries
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("SLICEWISE_NUM_WORKERS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.num_workers = v;
            }
        }

        if let Ok(s) = std::env::var("SLICEWISE_EXECUTION_MODE") {
            if let Ok(v) = s.parse::<ExecutionMode>() {
                cfg.execution_mode = v;
            }
        }

        if let Ok(s) = std::env::var("SLICEWISE_QUEUE_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.queue_capacity = v;
            }
        }

        if let Ok(s) = std::env::var("SLICEWISE_BUFFER_POOL_SLOTS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.buffer_pool_slots = v;
            }
        }

        if let Ok(s) = std::env::var("SLICEWISE_BUFFER_SLOT_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.buffer_slot_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("SLICEWISE_BUFFER_ACQUIRE_TIMEOUT_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.buffer_acquire_timeout_ms = v;
            }
        }

        if let Ok(s) = std::env::var("SLICEWISE_MEM_CAP_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.mem_cap_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("SLICEWISE_LIFECYCLE_RETRIES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.lifecycle_retries = v;
            }
        }

        cfg
    }

    /// Reject configurations the runtime cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(Error::Config("num_workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.buffer_pool_slots == 0 || self.buffer_slot_bytes == 0 {
            return Err(Error::Config(
                "buffer pool needs at least one slot of non-zero size".into(),
            ));
        }
        let pool_bytes = self
            .buffer_pool_slots
            .checked_mul(self.buffer_slot_bytes)
            .ok_or_else(|| Error::Config("buffer pool size overflows usize".into()))?;
        if pool_bytes > self.mem_cap_bytes {
            return Err(Error::Config(format!(
                "buffer pool needs {pool_bytes} bytes but mem_cap_bytes is {}",
                self.mem_cap_bytes
            )));
        }
        Ok(())
    }

    /// Total bytes the buffer pool accounts when every slot is in use.
    pub fn pool_bytes(&self) -> usize {
        self.buffer_pool_slots.saturating_mul(self.buffer_slot_bytes)
    }
}
