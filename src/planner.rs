//! Chunk planning.
//!
//! The planner cuts an input file into contiguous byte ranges ([`FileChunk`])
//! that together cover `[0, file_size)` exactly once. Range widths come from a
//! row-density estimate supplied by the caller:
//!
//! 1. `avg_bytes_per_row = file_size / expected_rows`
//! 2. `target_bytes = rows_per_chunk * avg_bytes_per_row`
//! 3. From each chunk start, jump `target_bytes` ahead and then scan forward to
//!    the next `\n`; the chunk ends just past it (or at end of file).
//!
//! Step 3 is what makes the plan row-safe: however wrong the estimate is for a
//! given region, no record is ever split between two chunks. A stale estimate
//! only skews chunk sizes.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// One newline-aligned byte range `[start_offset, end_offset)` of the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileChunk {
    pub id: usize,
    pub start_offset: u64,
    pub end_offset: u64,
}

impl FileChunk {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plan chunks for the file at `path`.
///
/// # Errors
/// [`IngestError::Config`] if `expected_rows` or `rows_per_chunk` is zero;
/// [`IngestError::Setup`] if the file cannot be opened or read.
pub fn plan(path: &Path, expected_rows: u64, rows_per_chunk: u64) -> Result<Vec<FileChunk>> {
    let file = File::open(path)
        .map_err(|e| IngestError::setup(format!("open {}: {e}", path.display())))?;
    let file_size = file
        .metadata()
        .map_err(|e| IngestError::setup(format!("stat {}: {e}", path.display())))?
        .len();
    plan_reader(file, file_size, expected_rows, rows_per_chunk)
        .map_err(|e| match e {
            IngestError::Io(io) => IngestError::setup(format!("scan {}: {io}", path.display())),
            other => other,
        })
}

/// Plan chunks over any seekable source of `file_size` bytes.
///
/// # Errors
/// Same as [`plan`], with read failures reported as [`IngestError::Io`].
pub fn plan_reader<R: Read + Seek>(
    source: R,
    file_size: u64,
    expected_rows: u64,
    rows_per_chunk: u64,
) -> Result<Vec<FileChunk>> {
    if expected_rows == 0 {
        return Err(IngestError::config("expected row count must be positive"));
    }
    if rows_per_chunk == 0 {
        return Err(IngestError::config("rows per chunk must be positive"));
    }

    let target_bytes = target_chunk_bytes(file_size, expected_rows, rows_per_chunk);
    debug!(file_size, expected_rows, rows_per_chunk, target_bytes, "planning chunks");

    let mut reader = BufReader::new(source);
    let mut scratch = Vec::new();
    let mut chunks = Vec::new();
    let mut start = 0u64;
    while start < file_size {
        let mut end = start.saturating_add(target_bytes).min(file_size);
        if end < file_size {
            reader.seek(SeekFrom::Start(end))?;
            scratch.clear();
            let advanced = reader.read_until(b'\n', &mut scratch)? as u64;
            end = (end + advanced).min(file_size);
            if advanced == 0 {
                // Source shorter than advertised; close the plan at the claimed size.
                end = file_size;
            }
        }
        chunks.push(FileChunk {
            id: chunks.len(),
            start_offset: start,
            end_offset: end,
        });
        start = end;
    }
    Ok(chunks)
}

/// Byte width a chunk should have if every row were average-sized. Never zero.
#[must_use]
pub fn target_chunk_bytes(file_size: u64, expected_rows: u64, rows_per_chunk: u64) -> u64 {
    if expected_rows == 0 {
        return file_size.max(1);
    }
    let bytes = u128::from(file_size) * u128::from(rows_per_chunk) / u128::from(expected_rows);
    u64::try_from(bytes).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn plan_bytes(data: &[u8], expected: u64, per_chunk: u64) -> Vec<FileChunk> {
        plan_reader(Cursor::new(data), data.len() as u64, expected, per_chunk).unwrap()
    }

    #[test]
    fn target_width_scales_with_density() {
        assert_eq!(target_chunk_bytes(1000, 100, 10), 100);
        assert_eq!(target_chunk_bytes(1000, 100, 1000), 10_000);
        assert_eq!(target_chunk_bytes(5, 100, 1), 1);
    }

    #[test]
    fn chunks_end_after_newlines() {
        let data = b"aaaa\nbb\ncccccc\nd\neeeee";
        let chunks = plan_bytes(data, 5, 2);
        for c in &chunks[..chunks.len() - 1] {
            assert_eq!(data[c.end_offset as usize - 1], b'\n');
        }
        assert_eq!(chunks.last().unwrap().end_offset, data.len() as u64);
    }

    #[test]
    fn overestimated_width_gives_single_chunk() {
        let data = b"a\nb\nc\n";
        let chunks = plan_bytes(data, 1, 100);
        assert_eq!(
            chunks,
            vec![FileChunk { id: 0, start_offset: 0, end_offset: 6 }]
        );
    }

    #[test]
    fn zero_estimate_is_a_config_error() {
        let err = plan_reader(Cursor::new(b"x\n"), 2, 0, 10).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }
}
