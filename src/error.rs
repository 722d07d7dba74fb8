//! Error taxonomy for the ingestion pipeline.
//!
//! Only [`IngestError::Config`] and [`IngestError::Setup`] are meant to reach the
//! top level. Every other variant describes the failure of one unit of work
//! (a chunk, an intermediate store, an index column) and is caught at that
//! unit's boundary and turned into a skip-and-continue outcome.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Bad configuration; raised before any work starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cannot open the input, create the workspace, or open the target.
    #[error("setup error: {0}")]
    Setup(String),

    #[error("chunk {chunk_id}: extraction failed: {source}")]
    ChunkExtraction {
        chunk_id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("chunk {chunk_id}: load failed: {reason}")]
    ChunkLoad { chunk_id: usize, reason: String },

    #[error("merge of {} failed: {reason}", path.display())]
    Merge { path: PathBuf, reason: String },

    #[error("index on {column} failed: {reason}")]
    Index { column: String, reason: String },

    #[error("statistics refresh failed: {0}")]
    StatsRefresh(String),

    /// Malformed input row reported by the bulk loader.
    #[error("malformed row {row}: {reason}")]
    Malformed { row: u64, reason: String },

    #[error("engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// True for errors that must abort the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Setup(_))
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, IngestError>;
