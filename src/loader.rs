//! Per-chunk loading into private intermediate stores.
//!
//! A [`ChunkLoader`] call touches only its own byte range, its own scratch
//! file (`chunk_<id>.csv`) and its own store (`chunk_<id>.db`), so any number
//! of calls can run side by side without coordination. Failures never escape
//! a call: they come back as [`ChunkOutcome::Failed`] so the caller decides
//! whether to aggregate, alert or abort.

use crate::error::{IngestError, Result};
use crate::io::compression::Compression;
use crate::io::delimited::count_rows;
use crate::planner::FileChunk;
use crate::store::StoreEngine;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// A per-chunk store awaiting merge.
///
/// Deliberately not `Clone`: merging consumes it, and the backing file is gone
/// afterwards.
#[derive(Debug, PartialEq, Eq)]
pub struct IntermediateStore {
    path: PathBuf,
    row_count: u64,
}

impl IntermediateStore {
    /// Take ownership of a store file already on disk, such as one preserved
    /// by a failed merge.
    pub fn adopt(path: impl Into<PathBuf>, row_count: u64) -> Self {
        Self {
            path: path.into(),
            row_count,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows the loader counted for this store.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Give up the handle and return the path without touching the file.
    #[must_use]
    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Result of loading one chunk.
#[derive(Debug)]
pub enum ChunkOutcome {
    Loaded {
        chunk: FileChunk,
        rows: u64,
        store: IntermediateStore,
    },
    Failed {
        chunk: FileChunk,
        cause: IngestError,
    },
}

impl ChunkOutcome {
    #[must_use]
    pub fn chunk(&self) -> &FileChunk {
        match self {
            Self::Loaded { chunk, .. } | Self::Failed { chunk, .. } => chunk,
        }
    }

    /// Rows contributed; zero for a failed chunk.
    #[must_use]
    pub fn rows(&self) -> u64 {
        match self {
            Self::Loaded { rows, .. } => *rows,
            Self::Failed { .. } => 0,
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

/// Loads chunks of one input file into stores under one workspace directory.
#[derive(Clone, Debug)]
pub struct ChunkLoader {
    input: PathBuf,
    workspace: PathBuf,
    engine: StoreEngine,
}

impl ChunkLoader {
    pub fn new(input: impl Into<PathBuf>, workspace: impl Into<PathBuf>, engine: StoreEngine) -> Self {
        Self {
            input: input.into(),
            workspace: workspace.into(),
            engine,
        }
    }

    #[must_use]
    pub fn scratch_path(&self, chunk_id: usize) -> PathBuf {
        self.workspace.join(format!("chunk_{chunk_id}.csv"))
    }

    #[must_use]
    pub fn store_path(&self, chunk_id: usize) -> PathBuf {
        self.workspace.join(format!("chunk_{chunk_id}.db"))
    }

    /// Load `chunk` into a fresh intermediate store.
    ///
    /// The scratch file is removed on every path out of this call. On failure
    /// the store file, which holds no rows since its load rolled back, is
    /// removed as well.
    pub fn load(&self, chunk: FileChunk) -> ChunkOutcome {
        let scratch = self.scratch_path(chunk.id);
        let store_path = self.store_path(chunk.id);
        debug!(
            chunk = chunk.id,
            start = chunk.start_offset,
            end = chunk.end_offset,
            "loading chunk"
        );

        let result = self.try_load(&chunk, &scratch, &store_path);
        remove_quietly(&scratch);

        match result {
            Ok(rows) => ChunkOutcome::Loaded {
                chunk,
                rows,
                store: IntermediateStore {
                    path: store_path,
                    row_count: rows,
                },
            },
            Err(cause) => {
                error!(chunk = chunk.id, error = %cause, "chunk failed; its rows are not loaded");
                remove_quietly(&store_path);
                ChunkOutcome::Failed { chunk, cause }
            }
        }
    }

    fn try_load(&self, chunk: &FileChunk, scratch: &Path, store_path: &Path) -> Result<u64> {
        let extraction = |source| IngestError::ChunkExtraction {
            chunk_id: chunk.id,
            source,
        };
        let load_error = |e: IngestError| IngestError::ChunkLoad {
            chunk_id: chunk.id,
            reason: e.to_string(),
        };

        let rows = {
            let data = read_range(&self.input, chunk).map_err(extraction)?;
            let rows = count_rows(&data);
            fs::write(scratch, &data).map_err(extraction)?;
            rows
        };

        match fs::remove_file(store_path) {
            Ok(()) => debug!(store = %store_path.display(), "removed stale store"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(extraction(e)),
        }

        let mut store = self.engine.open_scratch(store_path).map_err(load_error)?;
        store.create_schema().map_err(load_error)?;
        let inserted = store
            .bulk_load(scratch, Compression::None)
            .map_err(load_error)?;
        store.close().map_err(load_error)?;

        // Blank lines are counted but never inserted; the range is not clean.
        if inserted != rows {
            return Err(IngestError::ChunkLoad {
                chunk_id: chunk.id,
                reason: format!("{rows} lines counted but {inserted} rows inserted"),
            });
        }
        debug!(chunk = chunk.id, rows, "chunk loaded");
        Ok(rows)
    }
}

/// Load one chunk with a throwaway [`ChunkLoader`].
pub fn load_chunk(
    chunk: FileChunk,
    input: &Path,
    workspace: &Path,
    engine: &StoreEngine,
) -> ChunkOutcome {
    ChunkLoader::new(input, workspace, engine.clone()).load(chunk)
}

/// Read exactly the bytes of `chunk` from `path`.
///
/// # Errors
/// Any I/O error, including `UnexpectedEof` if the file is shorter than the range.
pub fn read_range(path: &Path, chunk: &FileChunk) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(chunk.start_offset))?;
    let len = usize::try_from(chunk.len())
        .map_err(|_| std::io::Error::new(ErrorKind::InvalidInput, "chunk too large for memory"))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove file"),
    }
}
