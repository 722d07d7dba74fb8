//! Store engine sessions.

use anyhow::Result;
use shardload::config::{EngineConfig, MemoryLimit};
use shardload::testing::*;
use shardload::{IngestError, StoreEngine};
use std::io::Cursor;

#[test]
fn bulk_load_is_all_or_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut store = StoreEngine::default().open(&dir.path().join("s.db"))?;
    store.create_schema()?;

    assert_eq!(store.bulk_load_reader(Cursor::new(sample_bytes(10, true)))?, 10);

    let mut bad = sample_bytes(3, true);
    bad.extend_from_slice(b"x;y;z;w;v;u;t;s;r;extra\n");
    let err = store.bulk_load_reader(Cursor::new(bad)).unwrap_err();
    assert!(matches!(err, IngestError::Malformed { row: 4, .. }), "{err}");
    assert_eq!(store.count_rows()?, 10);
    Ok(())
}

#[test]
fn attached_rows_append_atomically() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = StoreEngine::new(
        EngineConfig::default()
            .with_memory_limit("64MiB".parse::<MemoryLimit>()?)
            .with_threads(2),
    );
    let src_path = dir.path().join("src.db");
    {
        let mut src = engine.open_scratch(&src_path)?;
        src.create_schema()?;
        src.bulk_load_reader(Cursor::new(sample_bytes(15, false)))?;
        src.close()?;
    }

    let mut target = engine.open(&dir.path().join("t.db"))?;
    target.create_schema()?;
    target.attach(&src_path, "src")?;
    assert_eq!(target.count_rows_in("src")?, 15);
    assert_eq!(target.append_from("src")?, 15);
    target.detach("src")?;

    assert_eq!(target.count_rows()?, 15);
    assert_eq!(target.count_where("country", "US")?, sample_country_count(15, "US"));
    assert!(target.size_bytes()? > 0);
    Ok(())
}

#[test]
fn unknown_columns_are_rejected_before_any_sql() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut store = StoreEngine::default().open(&dir.path().join("s.db"))?;
    store.create_schema()?;
    assert!(matches!(
        store.count_where("country\" OR 1=1 --", "US"),
        Err(IngestError::Config(_))
    ));
    assert!(matches!(store.create_index("nope"), Err(IngestError::Config(_))));
    Ok(())
}

#[test]
fn sample_tables_are_temporary() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("s.db");
    let mut store = StoreEngine::default().open(&path)?;
    store.create_schema()?;
    store.bulk_load_reader(Cursor::new(sample_bytes(100, true)))?;

    let everything = store.create_sample("ip", 1.0)?;
    assert_eq!(everything, 100);
    let none = store.create_sample("ip", 0.0)?;
    assert_eq!(none, 0);
    store.drop_sample("ip")?;
    store.close()?;

    let conn = rusqlite::Connection::open(&path)?;
    let tables: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'sample_%'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(tables, 0);
    Ok(())
}
