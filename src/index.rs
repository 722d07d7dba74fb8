//! Secondary index construction on the loaded target.
//!
//! Each [`IndexSpec`] names one column and a sample fraction. With a fraction
//! below `1.0` the builder first materialises a temporary sample and indexes
//! it, warming the engine's caches and surfacing cost before the real build.
//! The final index is always built over the full table. The sample is dropped
//! afterwards.
//!
//! [`RunMode::Parallel`] builds every column concurrently, each on its own
//! connection. This is experimental: it relies on the engine queueing
//! concurrent schema writers (the busy timeout in [`EngineConfig`]), which the
//! builder itself cannot guarantee.
//!
//! A failed column is logged and reported; the other columns proceed.
//!
//! [`EngineConfig`]: crate::config::EngineConfig

use crate::error::{IngestError, Result};
use crate::store::{StoreEngine, schema};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Serial,
    Parallel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub column: String,
    /// Share of rows in the warm-up sample, in `(0, 1]`. `1.0` skips sampling.
    pub sample_fraction: f64,
}

impl IndexSpec {
    pub fn new(column: impl Into<String>, sample_fraction: f64) -> Self {
        Self {
            column: column.into(),
            sample_fraction,
        }
    }

    pub fn full(column: impl Into<String>) -> Self {
        Self::new(column, 1.0)
    }

    fn uses_sample(&self) -> bool {
        self.sample_fraction < 1.0
    }
}

#[derive(Debug, Default)]
pub struct IndexReport {
    pub built: Vec<String>,
    pub failed: Vec<IngestError>,
    pub stats_refreshed: bool,
    pub stats_error: Option<IngestError>,
    pub elapsed: Duration,
}

impl IndexReport {
    #[must_use]
    pub fn all_built(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct IndexBuilder {
    engine: StoreEngine,
    refresh_stats: bool,
}

impl IndexBuilder {
    #[must_use]
    pub fn new(engine: StoreEngine) -> Self {
        Self {
            engine,
            refresh_stats: true,
        }
    }

    #[must_use]
    pub fn with_refresh_stats(mut self, refresh: bool) -> Self {
        self.refresh_stats = refresh;
        self
    }

    /// Build the index for each [`IndexSpec`] on the store at `target`.
    ///
    /// # Errors
    /// Only a missing or unopenable target (or a worker pool that cannot be
    /// built) is returned as an error; per-column failures land in
    /// [`IndexReport::failed`].
    pub fn build(&self, target: &Path, specs: &[IndexSpec], mode: RunMode) -> Result<IndexReport> {
        let started = Instant::now();
        if !target.is_file() {
            return Err(IngestError::setup(format!(
                "target {} does not exist",
                target.display()
            )));
        }
        let rows = {
            let store = self.engine.open(target).map_err(|e| {
                IngestError::setup(format!("open target {}: {e}", target.display()))
            })?;
            store.count_rows()?
        };
        info!("Creating indexes for {rows} rows ({} columns, {mode:?})", specs.len());

        let outcomes: Vec<Result<String>> = match mode {
            RunMode::Serial => specs.iter().map(|s| self.build_one(target, s)).collect(),
            RunMode::Parallel => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(specs.len().max(1))
                    .build()
                    .map_err(|e| IngestError::setup(format!("index worker pool: {e}")))?;
                pool.install(|| specs.par_iter().map(|s| self.build_one(target, s)).collect())
            }
        };

        let mut report = IndexReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(column) => report.built.push(column),
                Err(e) => {
                    error!(error = %e, "index build failed");
                    report.failed.push(e);
                }
            }
        }

        if self.refresh_stats {
            info!("Running ANALYZE to refresh query-planning statistics");
            match self.refresh(target) {
                Ok(()) => report.stats_refreshed = true,
                Err(e) => {
                    warn!(error = %e, "statistics refresh failed; indexes are still usable");
                    report.stats_error = Some(e);
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            built = report.built.len(),
            failed = report.failed.len(),
            "All indexes processed in {:.2} seconds",
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    fn build_one(&self, target: &Path, spec: &IndexSpec) -> Result<String> {
        let started = Instant::now();
        let fail = |e: IngestError| IngestError::Index {
            column: spec.column.clone(),
            reason: e.to_string(),
        };
        let column = schema::check_column(&spec.column).map_err(fail)?;
        let mut store = self.engine.open(target).map_err(fail)?;

        if spec.uses_sample() {
            let sampled = store.create_sample(column, spec.sample_fraction).map_err(fail)?;
            info!(column, sampled, "sample index built; building full index");
            let built = store.create_index(column);
            if let Err(e) = store.drop_sample(column) {
                warn!(column, error = %e, "sample table not dropped");
            }
            built.map_err(fail)?;
        } else {
            info!(column, "creating index");
            store.create_index(column).map_err(fail)?;
        }
        store.close().map_err(fail)?;

        info!(
            "Index on {column} created in {:.2} seconds",
            started.elapsed().as_secs_f64()
        );
        Ok(column.to_string())
    }

    fn refresh(&self, target: &Path) -> Result<()> {
        let store = self.engine.open(target)?;
        store
            .analyze()
            .map_err(|e| IngestError::StatsRefresh(e.to_string()))?;
        store.close()
    }
}

/// Build `specs` on `target` with statistics refresh enabled.
///
/// # Errors
/// See [`IndexBuilder::build`].
pub fn build_indexes(
    target: &Path,
    specs: &[IndexSpec],
    mode: RunMode,
    engine: &StoreEngine,
) -> Result<IndexReport> {
    IndexBuilder::new(engine.clone()).build(target, specs, mode)
}
