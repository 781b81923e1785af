use thiserror::Error;

/// Result type local to slicewise-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("memory budget exceeded for tag '{tag}': requested {requested} bytes, capacity {capacity}, used {used}")]
    BudgetExceeded {
        tag: &'static str,
        requested: usize,
        capacity: usize,
        used: usize,
    },

    /// The pool stayed exhausted for the whole bounded wait.
    #[error("buffer pool exhausted: all {slots} slots in use after waiting {waited_ms} ms")]
    PoolExhausted { slots: usize, waited_ms: u64 },

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}
