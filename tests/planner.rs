//! Chunk planning over real files.

use anyhow::Result;
use shardload::io::delimited::count_rows;
use shardload::planner::{FileChunk, plan, plan_reader};
use shardload::testing::*;
use shardload::IngestError;
use std::fs;
use std::io::Cursor;

fn rows_per_chunk(data: &[u8], chunks: &[FileChunk]) -> Vec<u64> {
    chunks
        .iter()
        .map(|c| count_rows(&data[c.start_offset as usize..c.end_offset as usize]))
        .collect()
}

#[test]
fn ten_rows_in_chunks_of_three() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("ten.csv");
    write_rows_file(&input, 10, false, shardload::Compression::None)?;
    let data = fs::read(&input)?;

    let chunks = plan(&input, 10, 3)?;
    assert_chunks_cover(&chunks, data.len() as u64);
    assert_newline_aligned(&data, &chunks);
    assert_eq!(rows_per_chunk(&data, &chunks), vec![3, 3, 3, 1]);
    Ok(())
}

#[test]
fn stale_estimate_only_skews_chunk_sizes() -> Result<()> {
    let data = sample_bytes(10, true);
    let size = data.len() as u64;

    // Claims far more rows than exist: every chunk still ends on a row boundary.
    let many = plan_reader(Cursor::new(&data), size, 1_000, 1)?;
    assert_chunks_cover(&many, size);
    assert_newline_aligned(&data, &many);
    assert_eq!(rows_per_chunk(&data, &many), vec![1; 10]);

    // Claims a single row: one chunk covers the whole file.
    let one = plan_reader(Cursor::new(&data), size, 1, 1)?;
    assert_eq!(one.len(), 1);
    assert_eq!(rows_per_chunk(&data, &one), vec![10]);
    Ok(())
}

#[test]
fn chunks_partition_the_file_and_its_rows() -> Result<()> {
    for rows in [1u64, 2, 7, 50, 123] {
        for per_chunk in [1u64, 3, 10, 1000] {
            for trailing in [true, false] {
                let data = sample_bytes(rows, trailing);
                let size = data.len() as u64;
                let chunks = plan_reader(Cursor::new(&data), size, rows, per_chunk)?;

                assert_chunks_cover(&chunks, size);
                assert_newline_aligned(&data, &chunks);

                let rejoined: Vec<u8> = chunks
                    .iter()
                    .flat_map(|c| data[c.start_offset as usize..c.end_offset as usize].to_vec())
                    .collect();
                assert_eq!(rejoined, data);
                assert_eq!(rows_per_chunk(&data, &chunks).iter().sum::<u64>(), rows);
            }
        }
    }
    Ok(())
}

#[test]
fn empty_input_has_no_chunks() -> Result<()> {
    let chunks = plan_reader(Cursor::new(Vec::<u8>::new()), 0, 1, 1)?;
    assert!(chunks.is_empty());
    Ok(())
}

#[test]
fn zero_estimates_are_config_errors() {
    let data = sample_bytes(3, true);
    let size = data.len() as u64;
    assert!(matches!(
        plan_reader(Cursor::new(&data), size, 0, 1),
        Err(IngestError::Config(_))
    ));
    assert!(matches!(
        plan_reader(Cursor::new(&data), size, 3, 0),
        Err(IngestError::Config(_))
    ));
}

#[test]
fn missing_input_is_a_setup_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let err = plan(&dir.path().join("absent.csv"), 10, 3).unwrap_err();
    assert!(matches!(err, IngestError::Setup(_)), "{err}");
    assert!(err.is_fatal());
    Ok(())
}
