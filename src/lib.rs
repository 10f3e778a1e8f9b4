//! # chunkshift - adaptive bulk content transformation
//!
//! Applies ordered content transformations to large file sets while keeping
//! process memory inside a budget.
//!
//! ## Components
//!
//! - [`cache`]: memory-bounded content cache keyed by path and mtime
//! - [`memory`]: process memory monitor with pressure classification
//! - [`transform`]: literal rules, pluggable providers and the streaming pipeline
//! - [`parallel`]: thread pool for CPU-bound transforms
//! - [`engine`]: chunk scheduler and per-file tasks
//! - [`config`] and [`cli`]: layered configuration and the command line
//!
//! ## Quick Start
//!
//! ```bash
//! chunkshift apply --rule 'require(=import(' src/a.js src/b.js
//! chunkshift apply --files-from worklist.txt --jobs 16 --dry-run
//! chunkshift status
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod parallel;
pub mod transform;

pub use cli::{Cli, Output};
pub use config::{ChunkshiftConfig, EngineConfig};
pub use engine::{CancelToken, Engine, EngineResult};
pub use error::{EngineError, FileError};

/// Result type alias for application-level operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
