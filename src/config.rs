//! Run configuration.
//!
//! Every knob of a run lives in one of three plain, serializable structs:
//! [`EngineConfig`] for per-connection engine settings, [`LoadConfig`] for the
//! ingestion path, and [`IndexConfig`] for the index builder. Each exposes a
//! `validate()` that is called before any work starts, so that bad settings
//! surface as [`IngestError::Config`] instead of a half-finished run.

use crate::error::{IngestError, Result};
use crate::index::{IndexSpec, RunMode};
use crate::io::compression::Compression;
use crate::merge::MergeOptions;
use crate::runner::ExecMode;
use crate::store::schema;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::path::PathBuf;
use std::str::FromStr;

/// A memory ceiling in bytes, parsed from human strings such as `8GB` or `512MiB`.
///
/// Decimal units (`KB`, `MB`, `GB`, `TB`) are powers of 1000, binary units
/// (`KiB`, `MiB`, `GiB`, `TiB`) powers of 1024. A bare number is bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryLimit(pub u64);

impl MemoryLimit {
    #[must_use]
    pub fn bytes(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn kibibytes(self) -> u64 {
        self.0 / 1024
    }
}

impl Default for MemoryLimit {
    fn default() -> Self {
        Self(8_000_000_000)
    }
}

impl FromStr for MemoryLimit {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (num, unit) = s.split_at(split);
        let value: f64 = num
            .parse()
            .map_err(|_| IngestError::config(format!("invalid memory limit '{s}'")))?;
        let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" => 1_000,
            "m" | "mb" => 1_000_000,
            "g" | "gb" => 1_000_000_000,
            "t" | "tb" => 1_000_000_000_000,
            "kib" => 1 << 10,
            "mib" => 1 << 20,
            "gib" => 1 << 30,
            "tib" => 1 << 40,
            other => {
                return Err(IngestError::config(format!(
                    "unknown memory unit '{other}' in '{s}'"
                )));
            }
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let bytes = (value * multiplier as f64) as u64;
        if bytes == 0 {
            return Err(IngestError::config("memory limit must be positive"));
        }
        Ok(Self(bytes))
    }
}

impl Display for MemoryLimit {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        const GIB: u64 = 1 << 30;
        const MIB: u64 = 1 << 20;
        if self.0 >= GIB {
            write!(f, "{:.2} GiB", self.0 as f64 / GIB as f64)
        } else if self.0 >= MIB {
            write!(f, "{:.2} MiB", self.0 as f64 / MIB as f64)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

/// Settings applied to every engine connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub memory_limit: MemoryLimit,
    /// Auxiliary worker threads the engine may use inside one connection.
    pub threads: usize,
    /// How long a connection waits on a locked store before failing.
    pub busy_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit: MemoryLimit::default(),
            threads: (num_cpus::get() / 2).max(1),
            busy_timeout_ms: 60_000,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_memory_limit(mut self, limit: MemoryLimit) -> Self {
        self.memory_limit = limit;
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }
}

/// Everything one ingestion run needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadConfig {
    pub input: PathBuf,
    pub target: PathBuf,
    /// Scratch directory for extracted chunks and intermediate stores.
    pub workspace: PathBuf,
    pub compression: Compression,
    pub mode: ExecMode,
    /// Row-density estimate for the planner. When absent the input is counted once.
    pub expected_rows: Option<u64>,
    pub engine: EngineConfig,
    pub merge: MergeOptions,
}

impl LoadConfig {
    pub fn new(input: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            target: target.into(),
            workspace: PathBuf::from("./temp_dbs"),
            compression: Compression::None,
            mode: ExecMode::default(),
            expected_rows: None,
            engine: EngineConfig::default(),
            merge: MergeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace = dir.into();
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_expected_rows(mut self, rows: u64) -> Self {
        self.expected_rows = Some(rows);
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// # Errors
    ///
    /// Returns [`IngestError::Config`] for settings that cannot produce a valid run.
    pub fn validate(&self) -> Result<()> {
        if !self.compression.is_available() {
            return Err(IngestError::config(format!(
                "compression '{}' is not compiled into this build",
                self.compression
            )));
        }
        if self.expected_rows == Some(0) {
            return Err(IngestError::config("expected row count must be positive"));
        }
        if let ExecMode::Chunked { workers, rows_per_chunk } = self.mode {
            if workers == 0 {
                return Err(IngestError::config("worker count must be positive"));
            }
            if rows_per_chunk == 0 {
                return Err(IngestError::config("chunk size must be positive"));
            }
            if self.compression != Compression::None {
                return Err(IngestError::config(format!(
                    "{} input cannot be split by byte range; use direct mode",
                    self.compression
                )));
            }
        }
        Ok(())
    }
}

/// Settings for one index-building run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    pub target: PathBuf,
    pub columns: Vec<String>,
    pub sample_fraction: f64,
    pub run_mode: RunMode,
    pub refresh_stats: bool,
    pub engine: EngineConfig,
}

impl IndexConfig {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            columns: schema::DEFAULT_INDEX_COLUMNS
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
            sample_fraction: 1.0,
            run_mode: RunMode::Serial,
            refresh_stats: true,
            engine: EngineConfig::default(),
        }
    }

    /// Parse a comma-separated column list, ignoring blanks around names.
    #[must_use]
    pub fn with_column_list(mut self, list: &str) -> Self {
        self.columns = list
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    #[must_use]
    pub fn with_sample_fraction(mut self, fraction: f64) -> Self {
        self.sample_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_run_mode(mut self, mode: RunMode) -> Self {
        self.run_mode = mode;
        self
    }

    #[must_use]
    pub fn with_refresh_stats(mut self, refresh: bool) -> Self {
        self.refresh_stats = refresh;
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// # Errors
    ///
    /// Returns [`IngestError::Config`] for an empty or unknown column list, or a
    /// sample fraction outside `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(IngestError::config("no index columns given"));
        }
        for column in &self.columns {
            schema::check_column(column)?;
        }
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(IngestError::config(format!(
                "sample fraction {} outside (0, 1]",
                self.sample_fraction
            )));
        }
        Ok(())
    }

    /// One [`IndexSpec`] per configured column, all sharing the sample fraction.
    #[must_use]
    pub fn specs(&self) -> Vec<IndexSpec> {
        self.columns
            .iter()
            .map(|c| IndexSpec::new(c.clone(), self.sample_fraction))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_units() {
        assert_eq!("8GB".parse::<MemoryLimit>().unwrap().bytes(), 8_000_000_000);
        assert_eq!("512MiB".parse::<MemoryLimit>().unwrap().bytes(), 512 << 20);
        assert_eq!(" 1.5 gb ".parse::<MemoryLimit>().unwrap().bytes(), 1_500_000_000);
        assert_eq!("4096".parse::<MemoryLimit>().unwrap().bytes(), 4096);
    }

    #[test]
    fn rejects_bad_memory_limits() {
        assert!("lots".parse::<MemoryLimit>().is_err());
        assert!("8XB".parse::<MemoryLimit>().is_err());
        assert!("0GB".parse::<MemoryLimit>().is_err());
    }

    #[test]
    fn chunked_compressed_input_is_rejected() {
        let cfg = LoadConfig::new("in.csv", "out.db").with_compression(Compression::Zstd);
        assert!(matches!(cfg.validate(), Err(IngestError::Config(_))));
        let direct = cfg.with_mode(ExecMode::Direct);
        assert!(direct.validate().is_ok());
    }

    #[test]
    fn zero_workers_and_chunk_size_are_rejected() {
        let cfg = LoadConfig::new("in.csv", "out.db").with_mode(ExecMode::Chunked {
            workers: 0,
            rows_per_chunk: 10,
        });
        assert!(cfg.validate().is_err());
        let cfg = cfg.with_mode(ExecMode::Chunked { workers: 2, rows_per_chunk: 0 });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn index_config_checks_columns_and_fraction() {
        let cfg = IndexConfig::new("t.db").with_column_list(" domain , ip,,country ");
        assert_eq!(cfg.columns, vec!["domain", "ip", "country"]);
        assert!(cfg.validate().is_ok());

        assert!(cfg.clone().with_column_list("domain,nope").validate().is_err());
        assert!(cfg.clone().with_sample_fraction(0.0).validate().is_err());
        assert!(cfg.with_sample_fraction(1.5).validate().is_err());
    }
}
