//! End-to-end load runs.
//!
//! [`Runner::run`] drives one [`LoadConfig`] through either execution mode:
//!
//! - [`ExecMode::Chunked`]: plan byte ranges, load each on a dedicated worker
//!   pool, then fold the intermediate stores into the target one at a time.
//! - [`ExecMode::Direct`]: one bulk load straight into the target.
//!
//! Both end in a [`LoadReport`] whose [`Reconciliation`] says whether every
//! input row made it into the target and, if not, which byte ranges and which
//! stores are to blame.

use crate::config::LoadConfig;
use crate::direct::load_direct;
use crate::error::{IngestError, Result};
use crate::io::compression::Compression;
use crate::io::delimited::count_file_rows;
use crate::loader::{ChunkLoader, ChunkOutcome};
use crate::merge::{SkipReason, SkippedStore, merge_stores};
use crate::metrics::{MetricsCollector, names};
use crate::planner::{self, FileChunk};
use crate::store::StoreEngine;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_ROWS_PER_CHUNK: u64 = 250_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    Chunked { workers: usize, rows_per_chunk: u64 },
    Direct,
}

impl Default for ExecMode {
    fn default() -> Self {
        Self::Chunked {
            workers: DEFAULT_WORKERS,
            rows_per_chunk: DEFAULT_ROWS_PER_CHUNK,
        }
    }
}

/// Accounting of where the input's rows ended up.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Exact input row count, when it was counted rather than estimated.
    pub expected_rows: Option<u64>,
    /// Rows the loaders reported across all successful chunks.
    pub rows_loaded: u64,
    /// Rows actually appended to the target by this run.
    pub rows_merged: u64,
    /// Byte ranges whose rows are absent from the target.
    pub failed_chunks: Vec<FileChunk>,
    pub skipped_stores: Vec<SkippedStore>,
}

impl Reconciliation {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
            && self.skipped_stores.is_empty()
            && self.rows_merged == self.rows_loaded
            && self.expected_rows.is_none_or(|e| e == self.rows_merged)
    }

    /// Intermediate stores left on disk after a failed merge.
    pub fn preserved_stores(&self) -> impl Iterator<Item = &Path> {
        self.skipped_stores
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::Failed(_)))
            .map(|s| s.path.as_path())
    }
}

impl Display for Reconciliation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self.expected_rows {
            Some(expected) => write!(f, "expected {expected} rows, ")?,
            None => write!(f, "expected rows unknown, ")?,
        }
        write!(f, "loaded {}, merged {}", self.rows_loaded, self.rows_merged)?;
        if !self.failed_chunks.is_empty() {
            let ranges: Vec<String> = self
                .failed_chunks
                .iter()
                .map(|c| format!("{}..{}", c.start_offset, c.end_offset))
                .collect();
            write!(
                f,
                "; {} failed chunk(s) at bytes [{}]",
                self.failed_chunks.len(),
                ranges.join(", ")
            )?;
        }
        if !self.skipped_stores.is_empty() {
            write!(f, "; {} store(s) skipped", self.skipped_stores.len())?;
        }
        if self.is_complete() {
            write!(f, " (complete)")
        } else {
            write!(f, " (INCOMPLETE)")
        }
    }
}

/// What a finished run produced.
#[derive(Debug)]
pub struct LoadReport {
    pub mode: ExecMode,
    pub rows_merged: u64,
    pub elapsed: Duration,
    pub input_bytes: u64,
    /// On-disk size of the target after the run, if it could be read.
    pub target_bytes: Option<u64>,
    pub reconciliation: Reconciliation,
}

impl LoadReport {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows_merged as f64 / secs
        } else {
            0.0
        }
    }

    /// Target size relative to the input file size.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn storage_ratio(&self) -> Option<f64> {
        match (self.target_bytes, self.input_bytes) {
            (Some(target), input) if input > 0 => Some(target as f64 / input as f64),
            _ => None,
        }
    }
}

/// Executes load runs and records their metrics.
#[derive(Clone, Default)]
pub struct Runner {
    metrics: MetricsCollector,
}

impl Runner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record into an existing collector instead of a private one.
    #[must_use]
    pub fn with_metrics(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Run one load.
    ///
    /// # Errors
    /// Only configuration and setup failures are returned, plus a failed
    /// direct load. Chunk and merge failures are reported through
    /// [`LoadReport::reconciliation`].
    pub fn run(&self, cfg: &LoadConfig) -> Result<LoadReport> {
        cfg.validate()?;
        match serde_json::to_string(cfg) {
            Ok(json) => info!(config = %json, "starting load"),
            Err(e) => debug!(error = %e, "config not serializable"),
        }

        let input_bytes = fs::metadata(&cfg.input)
            .map_err(|e| IngestError::setup(format!("input {}: {e}", cfg.input.display())))?
            .len();
        let engine = StoreEngine::new(cfg.engine.clone());

        self.metrics.record_start();
        let started = Instant::now();
        let mut report = match cfg.mode {
            ExecMode::Chunked {
                workers,
                rows_per_chunk,
            } => self.run_chunked(cfg, &engine, input_bytes, workers, rows_per_chunk)?,
            ExecMode::Direct => self.run_direct(cfg, &engine, input_bytes)?,
        };
        report.elapsed = started.elapsed();
        self.metrics.record_end();

        self.metrics
            .set_counter(names::ROWS_MERGED, report.rows_merged);
        self.metrics.set_gauge(
            names::THROUGHPUT,
            report.throughput(),
            "Rows merged per second of wall time",
        );

        let secs = report.elapsed.as_secs_f64();
        info!(
            "Loaded {} rows in {secs:.2} seconds ({:.0} rows/s)",
            report.rows_merged,
            report.throughput()
        );
        if secs > 60.0 {
            info!("Total time: {:.2} minutes", secs / 60.0);
        }
        if report.reconciliation.is_complete() {
            info!(reconciliation = %report.reconciliation, "load reconciled");
        } else {
            warn!(reconciliation = %report.reconciliation, "load incomplete");
        }
        Ok(report)
    }

    fn run_chunked(
        &self,
        cfg: &LoadConfig,
        engine: &StoreEngine,
        input_bytes: u64,
        workers: usize,
        rows_per_chunk: u64,
    ) -> Result<LoadReport> {
        fs::create_dir_all(&cfg.workspace).map_err(|e| {
            IngestError::setup(format!("workspace {}: {e}", cfg.workspace.display()))
        })?;
        // Opened up front so an unusable target fails before any chunk work.
        let mut target = engine
            .open(&cfg.target)
            .map_err(|e| IngestError::setup(format!("open target {}: {e}", cfg.target.display())))?;

        let (estimate, exact) = expected_rows(cfg, Compression::None)?;
        let chunks = if input_bytes == 0 || estimate == 0 {
            Vec::new()
        } else {
            planner::plan(&cfg.input, estimate, rows_per_chunk)?
        };
        info!(
            "Planned {} chunks of ~{rows_per_chunk} rows over {input_bytes} bytes",
            chunks.len()
        );

        let mut reconciliation = Reconciliation {
            expected_rows: exact,
            ..Reconciliation::default()
        };
        let mut stores = Vec::with_capacity(chunks.len());
        for outcome in self.load_chunks(cfg, engine, chunks, workers)? {
            match outcome {
                ChunkOutcome::Loaded { chunk, rows: 0, store } => {
                    debug!(chunk = chunk.id, "chunk held no rows; store discarded");
                    discard(store.into_path());
                }
                ChunkOutcome::Loaded { chunk, rows, store } => {
                    reconciliation.rows_loaded += rows;
                    stores.push((chunk.id, store));
                }
                ChunkOutcome::Failed { chunk, .. } => reconciliation.failed_chunks.push(chunk),
            }
        }
        reconciliation.failed_chunks.sort_by_key(|c| c.id);
        stores.sort_by_key(|(id, _)| *id);

        info!("Merging {} intermediate stores into {}", stores.len(), cfg.target.display());
        let summary = merge_stores(
            &mut target,
            stores.into_iter().map(|(_, store)| store),
            &cfg.merge,
        )?;
        self.metrics
            .set_counter(names::STORES_MERGED, summary.merged as u64);
        self.metrics
            .set_counter(names::STORES_SKIPPED, summary.skipped.len() as u64);
        reconciliation.rows_merged = summary.rows_merged;
        reconciliation.skipped_stores = summary.skipped;

        let target_bytes = target.size_bytes().ok();
        target.close()?;
        cleanup_workspace(&cfg.workspace);

        Ok(LoadReport {
            mode: cfg.mode,
            rows_merged: reconciliation.rows_merged,
            elapsed: Duration::ZERO,
            input_bytes,
            target_bytes,
            reconciliation,
        })
    }

    /// Load every chunk on a dedicated pool, returning outcomes in completion order.
    #[allow(clippy::cast_precision_loss)]
    fn load_chunks(
        &self,
        cfg: &LoadConfig,
        engine: &StoreEngine,
        chunks: Vec<FileChunk>,
        workers: usize,
    ) -> Result<Vec<ChunkOutcome>> {
        let total = chunks.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let threads = workers.min(total).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("chunk-loader-{i}"))
            .build()
            .map_err(|e| IngestError::setup(format!("worker pool: {e}")))?;
        info!("Loading {total} chunks with {threads} workers");

        let loader = ChunkLoader::new(&cfg.input, &cfg.workspace, engine.clone());
        let (tx, rx) = mpsc::channel();
        for chunk in chunks {
            let tx = tx.clone();
            let loader = loader.clone();
            pool.spawn(move || {
                // The receiver outlives every job; a send can only fail if the
                // runner itself has gone away.
                tx.send(loader.load(chunk)).ok();
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        let mut processed = 0u64;
        for outcome in rx {
            match &outcome {
                ChunkOutcome::Loaded { rows, .. } => {
                    processed = self
                        .metrics
                        .increment_counter(names::ROWS_PROCESSED, *rows);
                    self.metrics.increment_counter(names::CHUNKS_LOADED, 1);
                    self.metrics
                        .record_histogram(names::CHUNK_ROWS, *rows as f64);
                }
                ChunkOutcome::Failed { chunk, cause } => {
                    self.metrics.increment_counter(names::CHUNKS_FAILED, 1);
                    error!(
                        chunk = chunk.id,
                        start = chunk.start_offset,
                        end = chunk.end_offset,
                        error = %cause,
                        "chunk not loaded"
                    );
                }
            }
            outcomes.push(outcome);
            info!(
                "Progress: {processed} rows processed ({}/{total} chunks)",
                outcomes.len()
            );
        }
        Ok(outcomes)
    }

    fn run_direct(&self, cfg: &LoadConfig, engine: &StoreEngine, input_bytes: u64) -> Result<LoadReport> {
        let before = {
            let target = engine.open(&cfg.target).map_err(|e| {
                IngestError::setup(format!("open target {}: {e}", cfg.target.display()))
            })?;
            target.create_schema()?;
            let rows = target.count_rows()?;
            target.close()?;
            rows
        };
        let (_, exact) = expected_rows(cfg, cfg.compression)?;

        let total = load_direct(&cfg.input, &cfg.target, cfg.compression, engine)?;
        let rows = total.saturating_sub(before);
        self.metrics.set_counter(names::ROWS_PROCESSED, rows);

        let target_bytes = engine
            .open(&cfg.target)
            .and_then(|store| {
                let size = store.size_bytes()?;
                store.close()?;
                Ok(size)
            })
            .ok();

        Ok(LoadReport {
            mode: cfg.mode,
            rows_merged: rows,
            elapsed: Duration::ZERO,
            input_bytes,
            target_bytes,
            reconciliation: Reconciliation {
                expected_rows: exact,
                rows_loaded: rows,
                rows_merged: rows,
                ..Reconciliation::default()
            },
        })
    }
}

/// Run `cfg` with a fresh [`Runner`].
///
/// # Errors
/// See [`Runner::run`].
pub fn run_load(cfg: &LoadConfig) -> Result<LoadReport> {
    Runner::new().run(cfg)
}

/// The planner's density estimate, and the exact count when one was taken.
fn expected_rows(cfg: &LoadConfig, compression: Compression) -> Result<(u64, Option<u64>)> {
    if let Some(estimate) = cfg.expected_rows {
        return Ok((estimate, None));
    }
    info!(input = %cfg.input.display(), "no row estimate given; counting input rows");
    let counted = count_file_rows(&cfg.input, compression)?;
    info!(rows = counted, "input rows counted");
    Ok((counted, Some(counted)))
}

fn discard(path: PathBuf) {
    if let Err(e) = fs::remove_file(&path) {
        warn!(store = %path.display(), error = %e, "empty store not removed");
    }
}

/// Remove the workspace if nothing is left in it, otherwise list what remains.
fn cleanup_workspace(workspace: &Path) {
    let pattern = format!(
        "{}/*",
        glob::Pattern::escape(&workspace.to_string_lossy())
    );
    let remaining: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(std::result::Result::ok).collect(),
        Err(e) => {
            warn!(error = %e, "cannot list workspace");
            return;
        }
    };
    if remaining.is_empty() {
        match fs::remove_dir(workspace) {
            Ok(()) => debug!(workspace = %workspace.display(), "workspace removed"),
            Err(e) => warn!(workspace = %workspace.display(), error = %e, "workspace not removed"),
        }
    } else {
        for path in &remaining {
            warn!(file = %path.display(), "left in workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_chunked() {
        assert_eq!(
            ExecMode::default(),
            ExecMode::Chunked {
                workers: 4,
                rows_per_chunk: 250_000
            }
        );
    }

    #[test]
    fn reconciliation_completeness() {
        let mut r = Reconciliation {
            expected_rows: Some(10),
            rows_loaded: 10,
            rows_merged: 10,
            ..Reconciliation::default()
        };
        assert!(r.is_complete());
        assert!(r.to_string().ends_with("(complete)"));

        r.failed_chunks.push(FileChunk {
            id: 2,
            start_offset: 40,
            end_offset: 60,
        });
        r.rows_merged = 7;
        assert!(!r.is_complete());
        let text = r.to_string();
        assert!(text.contains("40..60"), "{text}");
        assert!(text.ends_with("(INCOMPLETE)"));
    }

    #[test]
    fn unknown_expectation_only_checks_merge() {
        let r = Reconciliation {
            rows_loaded: 5,
            rows_merged: 5,
            ..Reconciliation::default()
        };
        assert!(r.is_complete());
    }

    #[test]
    fn storage_ratio_needs_both_sizes() {
        let mut report = LoadReport {
            mode: ExecMode::Direct,
            rows_merged: 0,
            elapsed: Duration::ZERO,
            input_bytes: 0,
            target_bytes: Some(4096),
            reconciliation: Reconciliation::default(),
        };
        assert_eq!(report.storage_ratio(), None);
        assert_eq!(report.throughput(), 0.0);
        report.input_bytes = 2048;
        assert_eq!(report.storage_ratio(), Some(2.0));
    }
}
