//! Thread pool for CPU-bound transform work
//!
//! The engine's own concurrency is async I/O on a tokio runtime, bounded by a
//! semaphore per chunk. Some transforms are heavy enough that running them on
//! the async workers would starve I/O. For those runs the engine starts a
//! [`WorkerPool`] of OS threads and routes transform calls through it as
//! messages.
//!
//! # Architecture Responsibilities
//!
//! ```text
//! ┌─────────────────┐  Job(path, content)  ┌──────────────────┐
//! │  per-file task  │─────────────────────▶│  worker thread   │
//! │  (tokio task)   │◀─────────────────────│  transformer     │
//! └─────────────────┘  oneshot result      └──────────────────┘
//! ```
//!
//! - **Sizing**: the engine sizes the pool from the memory monitor's
//!   recommended parallelism at run start, so the pool never outgrows what the
//!   I/O scheduler is allowed to keep in flight.
//! - **Lifecycle**: `start` spawns the threads, `shutdown` stops intake, drains
//!   queued jobs and joins. Dropping the pool shuts it down.
//!
//! # Example Usage
//!
//! ```rust
//! use chunkshift::parallel::WorkerPool;
//! use chunkshift::transform::{Rule, RuleSet, Transformer};
//! use std::path::PathBuf;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let rules = RuleSet::new(vec![Rule::new("foo", "bar")]).unwrap();
//!     let mut pool = WorkerPool::start(2, Transformer::rules_only(rules)).unwrap();
//!     let handle = pool.handle().unwrap();
//!
//!     let out = handle.transform(PathBuf::from("a.txt"), "foo".into()).await.unwrap();
//!     assert_eq!(out.content, "bar");
//!     pool.shutdown();
//! });
//! ```

pub mod pool;

pub use pool::{PoolHandle, WorkerPool};
