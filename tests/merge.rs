//! Folding intermediate stores into the target.

use anyhow::Result;
use shardload::planner::plan;
use shardload::testing::*;
use shardload::{
    ChunkLoader, ChunkOutcome, Compression, IntermediateStore, MergeOptions, SkipReason,
    StoreEngine, merge_stores,
};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

/// Load `rows` sample rows as chunks and return their stores in plan order.
fn loaded_stores(dir: &Path, rows: u64, per_chunk: u64) -> Result<Vec<IntermediateStore>> {
    let input = dir.join("in.csv");
    write_rows_file(&input, rows, true, Compression::None)?;
    let loader = ChunkLoader::new(&input, dir, StoreEngine::default());
    let mut stores = Vec::new();
    for chunk in plan(&input, rows, per_chunk)? {
        match loader.load(chunk) {
            ChunkOutcome::Loaded { store, .. } => stores.push(store),
            ChunkOutcome::Failed { cause, .. } => panic!("chunk failed: {cause}"),
        }
    }
    Ok(stores)
}

#[test]
fn merged_rows_equal_the_sum_of_store_rows() -> Result<()> {
    init_tracing_for_tests();
    let dir = tempfile::tempdir()?;
    let stores = loaded_stores(dir.path(), 40, 7)?;
    let expected: u64 = stores.iter().map(IntermediateStore::row_count).sum();
    let paths: Vec<_> = stores.iter().map(|s| s.path().to_path_buf()).collect();
    assert!(paths.len() > 1);

    let engine = StoreEngine::default();
    let target_path = dir.path().join("target.db");
    let mut target = engine.open(&target_path)?;
    let summary = merge_stores(&mut target, stores, &MergeOptions::default())?;
    target.close()?;

    assert_eq!(expected, 40);
    assert_eq!(summary.rows_merged, 40);
    assert_eq!(summary.merged, paths.len());
    assert!(summary.skipped.is_empty());
    assert_store_rows(&target_path, 40);
    assert!(paths.iter().all(|p| !p.exists()), "merged stores are removed");
    Ok(())
}

#[test]
fn merge_order_does_not_change_the_result() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut stores = loaded_stores(dir.path(), 25, 4)?;
    stores.reverse();

    let target_path = dir.path().join("target.db");
    let mut target = StoreEngine::default().open(&target_path)?;
    let summary = merge_stores(&mut target, stores, &MergeOptions::default())?;
    assert_eq!(summary.rows_merged, 25);
    assert_eq!(target.count_where("country", "US")?, sample_country_count(25, "US"));
    target.close()?;
    Ok(())
}

#[test]
fn tiny_store_is_skipped_and_its_rows_are_missing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = loaded_stores(dir.path(), 30, 10)?;
    assert!(stores.len() >= 2);
    let lost = stores[1].row_count();
    let tiny = stores[1].path().to_path_buf();
    OpenOptions::new().write(true).open(&tiny)?.set_len(500)?;

    let mut target = StoreEngine::default().open(&dir.path().join("target.db"))?;
    let summary = merge_stores(&mut target, stores, &MergeOptions::default())?;

    assert_eq!(summary.rows_merged, 30 - lost);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].path, tiny);
    assert!(matches!(
        summary.skipped[0].reason,
        SkipReason::BelowThreshold { bytes: 500 }
    ));
    assert_eq!(target.count_rows()?, 30 - lost);
    Ok(())
}

#[test]
fn missing_store_contributes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut target = StoreEngine::default().open(&dir.path().join("target.db"))?;
    let gone = IntermediateStore::adopt(dir.path().join("chunk_9.db"), 100);
    let summary = merge_stores(&mut target, [gone], &MergeOptions::default())?;
    assert_eq!(summary.rows_merged, 0);
    assert!(matches!(summary.skipped[0].reason, SkipReason::Missing));
    assert_eq!(target.count_rows()?, 0);
    Ok(())
}

#[test]
fn incompatible_store_is_preserved_and_target_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut stores = loaded_stores(dir.path(), 12, 100)?;
    assert_eq!(stores.len(), 1);

    // A store whose table has the wrong shape.
    let odd = dir.path().join("chunk_7.db");
    {
        let conn = rusqlite::Connection::open(&odd)?;
        conn.execute_batch(
            "CREATE TABLE domains (domain TEXT, ip TEXT);
             INSERT INTO domains VALUES ('a.com', '10.0.0.1');",
        )?;
    }
    assert!(fs::metadata(&odd)?.len() >= 1000);
    stores.insert(0, IntermediateStore::adopt(&odd, 1));

    let target_path = dir.path().join("target.db");
    let mut target = StoreEngine::default().open(&target_path)?;
    let summary = merge_stores(&mut target, stores, &MergeOptions::default())?;

    assert_eq!(summary.rows_merged, 12);
    assert_eq!(summary.merged, 1);
    let preserved: Vec<_> = summary.preserved().map(|s| s.path.clone()).collect();
    assert_eq!(preserved, vec![odd.clone()]);
    assert!(odd.exists());
    assert_eq!(target.count_rows()?, 12);
    Ok(())
}

#[test]
fn corrupted_store_merges_nothing_and_is_kept() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = loaded_stores(dir.path(), 5_000, 10_000)?;
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0].row_count(), 5_000);
    let damaged = stores[0].path().to_path_buf();

    // Overwrite two pages in the back quarter, well past the first rows.
    let len = fs::metadata(&damaged)?.len();
    let mut file = OpenOptions::new().write(true).open(&damaged)?;
    file.seek(SeekFrom::Start(len * 3 / 4))?;
    file.write_all(&[0xAB; 8192])?;
    file.sync_all()?;
    drop(file);

    let target_path = dir.path().join("target.db");
    let mut target = StoreEngine::default().open(&target_path)?;
    let summary = merge_stores(&mut target, stores, &MergeOptions::default())?;

    assert_eq!(summary.rows_merged, 0);
    assert_eq!(summary.merged, 0);
    assert_eq!(summary.skipped.len(), 1);
    assert!(
        matches!(summary.skipped[0].reason, SkipReason::Failed(_)),
        "{:?}",
        summary.skipped[0].reason
    );
    assert!(damaged.exists());
    assert_eq!(target.count_rows()?, 0);
    target.close()?;
    assert_store_rows(&target_path, 0);
    Ok(())
}

#[test]
fn threshold_is_configurable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = loaded_stores(dir.path(), 5, 100)?;
    let mut target = StoreEngine::default().open(&dir.path().join("target.db"))?;
    let strict = MergeOptions {
        min_store_bytes: u64::MAX,
    };
    let summary = merge_stores(&mut target, stores, &strict)?;
    assert_eq!(summary.rows_merged, 0);
    assert!(matches!(
        summary.skipped[0].reason,
        SkipReason::BelowThreshold { .. }
    ));
    Ok(())
}

#[test]
fn ten_rows_without_trailing_newline_merge_to_ten() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.csv");
    write_rows_file(&input, 10, false, Compression::None)?;
    let loader = ChunkLoader::new(&input, dir.path(), StoreEngine::default());

    let outcomes: Vec<ChunkOutcome> = plan(&input, 10, 3)?
        .into_iter()
        .map(|c| loader.load(c))
        .collect();
    let rows: Vec<u64> = outcomes.iter().map(ChunkOutcome::rows).collect();
    assert_eq!(rows, vec![3, 3, 3, 1]);

    let stores = outcomes.into_iter().filter_map(|o| match o {
        ChunkOutcome::Loaded { store, .. } => Some(store),
        ChunkOutcome::Failed { .. } => None,
    });
    let mut target = StoreEngine::default().open(&dir.path().join("target.db"))?;
    let summary = merge_stores(&mut target, stores, &MergeOptions::default())?;
    assert_eq!(summary.rows_merged, 10);
    Ok(())
}

#[test]
fn remerging_a_merged_store_counts_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stores = loaded_stores(dir.path(), 8, 100)?;
    let path = stores[0].path().to_path_buf();
    let rows = stores[0].row_count();

    let mut target = StoreEngine::default().open(&dir.path().join("target.db"))?;
    let first = merge_stores(&mut target, stores, &MergeOptions::default())?;
    assert_eq!(first.rows_merged, 8);

    // The handle was consumed above; only a fresh adoption of the stale path is possible.
    let again = merge_stores(
        &mut target,
        [IntermediateStore::adopt(&path, rows)],
        &MergeOptions::default(),
    )?;
    assert_eq!(again.rows_merged, 0);
    assert_eq!(target.count_rows()?, 8);
    Ok(())
}
