//! Command-line interface for chunkshift
//!
//! Argument parsing with clap, logging setup from `-v` counts and styled
//! output. Commands load configuration through
//! [`ChunkshiftConfig`](crate::config::ChunkshiftConfig) and hand the engine a
//! typed [`EngineConfig`](crate::config::EngineConfig).

pub mod commands;
pub mod output;

pub use commands::Cli;
pub use output::Output;
