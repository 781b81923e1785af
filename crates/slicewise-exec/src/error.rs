use thiserror::Error;

use slicewise_window::WindowError;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("runtime configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Pool(#[from] slicewise_mem::error::Error),

    #[error("{hook} failed with status {code}: {message}")]
    Handler {
        hook: &'static str,
        code: i32,
        message: String,
    },

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("pipeline aborted: {0}")]
    Aborted(String),

    #[error("pipeline is no longer accepting buffers")]
    Stopped,

    #[error("worker {0} panicked")]
    WorkerPanic(usize),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<slicewise_core::error::Error> for ExecError {
    fn from(e: slicewise_core::error::Error) -> Self {
        ExecError::Config(e.to_string())
    }
}
