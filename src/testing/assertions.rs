//! Assertions over chunk plans and stores.

use crate::config::EngineConfig;
use crate::planner::FileChunk;
use crate::store::StoreEngine;
use std::path::Path;

/// Assert that `chunks` tile `[0, file_size)` in order with sequential ids.
///
/// # Panics
///
/// Panics on a gap, an overlap, an empty chunk, or an id out of sequence.
pub fn assert_chunks_cover(chunks: &[FileChunk], file_size: u64) {
    let mut expected_start = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.id, i, "chunk ids out of sequence: {chunks:?}");
        assert_eq!(
            chunk.start_offset, expected_start,
            "gap or overlap before chunk {i}: {chunks:?}"
        );
        assert!(!chunk.is_empty(), "chunk {i} is empty: {chunks:?}");
        expected_start = chunk.end_offset;
    }
    assert_eq!(expected_start, file_size, "plan does not reach end of file: {chunks:?}");
}

/// Assert that every chunk except a file-final one ends just past a `\n`.
///
/// # Panics
///
/// Panics if any chunk boundary falls inside a row.
pub fn assert_newline_aligned(data: &[u8], chunks: &[FileChunk]) {
    for chunk in chunks {
        let end = usize::try_from(chunk.end_offset).expect("offset fits in memory");
        if end < data.len() {
            assert_eq!(
                data[end - 1],
                b'\n',
                "chunk {} ends mid-row at byte {end}",
                chunk.id
            );
        }
    }
}

/// Assert the row count of the store at `path`.
///
/// # Panics
///
/// Panics if the store cannot be opened or its count differs.
pub fn assert_store_rows(path: &Path, expected: u64) {
    let store = StoreEngine::new(EngineConfig::default())
        .open(path)
        .unwrap_or_else(|e| panic!("open {}: {e}", path.display()));
    let actual = store
        .count_rows()
        .unwrap_or_else(|e| panic!("count {}: {e}", path.display()));
    assert_eq!(actual, expected, "row count mismatch in {}", path.display());
}
