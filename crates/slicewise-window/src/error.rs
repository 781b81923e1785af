use slicewise_core::id::{OriginId, WorkerId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WindowError>;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("invalid window configuration: {0}")]
    Config(String),

    /// Missing column, row past a column's end, or a value of the wrong type.
    #[error("buffer access error: {0}")]
    BufferAccess(String),

    #[error("record at {ts} is behind the watermark {watermark}")]
    LateRecord { ts: u64, watermark: u64 },

    #[error("watermark regression on {origin}: {previous} -> {next}")]
    WatermarkRegression {
        origin: OriginId,
        previous: u64,
        next: u64,
    },

    #[error("buffer from unregistered {0}")]
    UnknownOrigin(OriginId),

    /// Two partial states with different shapes were combined.
    #[error("incompatible partial state: {0}")]
    IncompatibleState(String),

    #[error("{0} is outside the registered worker range")]
    UnknownWorker(WorkerId),

    #[error("sink rejected window [{start}, {end}): {reason}")]
    Emit { start: u64, end: u64, reason: String },

    #[error("window invariant violated: {0}")]
    Invariant(String),
}

impl WindowError {
    /// Errors that must abort the operator instance.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WindowError::Config(_)
                | WindowError::WatermarkRegression { .. }
                | WindowError::UnknownOrigin(_)
                | WindowError::IncompatibleState(_)
                | WindowError::UnknownWorker(_)
                | WindowError::Invariant(_)
        )
    }

    /// Errors confined to one buffer; the buffer is dropped and processing continues.
    pub fn is_buffer_error(&self) -> bool {
        matches!(self, WindowError::BufferAccess(_))
    }
}

impl From<slicewise_core::error::Error> for WindowError {
    fn from(e: slicewise_core::error::Error) -> Self {
        match e {
            slicewise_core::error::Error::Config(m) | slicewise_core::error::Error::Parse(m) => {
                WindowError::Config(m)
            }
            slicewise_core::error::Error::Schema(m) => WindowError::BufferAccess(m),
            slicewise_core::error::Error::Invariant(m) => WindowError::Invariant(m),
        }
    }
}

impl From<serde_yaml::Error> for WindowError {
    fn from(e: serde_yaml::Error) -> Self {
        WindowError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for WindowError {
    fn from(e: serde_json::Error) -> Self {
        WindowError::Config(e.to_string())
    }
}
