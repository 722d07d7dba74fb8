//! # Shardload
//!
//! A **bulk loader** for very large, `;`-delimited text files. Shardload moves
//! the rows of one input file into a single embedded SQLite table, either in
//! one pass or by splitting the file into row-aligned byte ranges that are
//! loaded in parallel and merged afterwards.
//!
//! ## Key Features
//!
//! - **Row-safe chunking** - byte ranges always end on a newline, so no record is split
//! - **Parallel loading** - each chunk lands in its own private intermediate store
//! - **Atomic merging** - a store merges completely or not at all, and failed stores are kept
//! - **Reconciliation** - every run reports rows expected, loaded, and merged
//! - **Direct mode** - one-pass load, also the path for gzip and zstd inputs
//! - **Index building** - serial or parallel, with optional sampling warm-up
//!
//! ## Quick Start
//!
//! ```no_run
//! use shardload::{ExecMode, LoadConfig, Runner};
//!
//! # fn main() -> anyhow::Result<()> {
//! let cfg = LoadConfig::new("domains.csv", "domains.db")
//!     .with_mode(ExecMode::Chunked { workers: 8, rows_per_chunk: 250_000 })
//!     .with_expected_rows(100_000_000);
//!
//! let report = Runner::new().run(&cfg)?;
//! println!("{}", report.reconciliation);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! 1. [`planner`] cuts the input into [`FileChunk`]s.
//! 2. [`loader`] turns each chunk into an [`IntermediateStore`] or a failed outcome.
//! 3. [`merge`] folds the stores into the target, one at a time.
//! 4. [`index`] builds secondary indexes and refreshes statistics.
//!
//! [`runner`] wires steps 1-3 together; [`direct`] replaces them with a single
//! bulk load.
//!
//! ## Errors
//!
//! Fallible operations return [`error::Result`]. Configuration and setup
//! errors abort a run; everything else is confined to the chunk, store, or
//! index column it happened in and is reported rather than raised.

pub mod config;
pub mod direct;
pub mod error;
pub mod index;
pub mod io;
pub mod loader;
pub mod merge;
pub mod metrics;
pub mod planner;
pub mod runner;
pub mod store;
pub mod testing;

pub use config::{EngineConfig, IndexConfig, LoadConfig, MemoryLimit};
pub use direct::load_direct;
pub use error::{IngestError, Result};
pub use index::{IndexBuilder, IndexReport, IndexSpec, RunMode, build_indexes};
pub use io::compression::Compression;
pub use loader::{ChunkLoader, ChunkOutcome, IntermediateStore, load_chunk};
pub use merge::{MergeOptions, MergeSummary, SkipReason, SkippedStore, merge_stores};
pub use metrics::MetricsCollector;
pub use planner::{FileChunk, plan};
pub use runner::{ExecMode, LoadReport, Reconciliation, Runner, run_load};
pub use store::{Store, StoreEngine};
