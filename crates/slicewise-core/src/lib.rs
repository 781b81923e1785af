#![forbid(unsafe_code)]
//! Shared building blocks for the slicewise windowed aggregation engine.
//!
//! Nothing in here spawns threads or touches I/O. The window operator, the
//! buffer pool and the runtime all depend on these types.

pub mod budget;
pub mod config;
pub mod error;
pub mod id;
pub mod measure;
pub mod prelude;
pub mod schema;
pub mod types;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
