//! Tests for the metrics module.

use anyhow::Result;
use shardload::metrics::{CounterMetric, GaugeMetric, HistogramMetric, MetricsCollector, names};
use serde_json::json;

#[test]
fn test_counter_metric() {
    let collector = MetricsCollector::new();
    collector.register(Box::new(CounterMetric::with_value("stores_merged", 5)));

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.get("stores_merged"), Some(&json!(5)));
}

#[test]
fn test_gauge_metric() {
    let collector = MetricsCollector::new();
    collector.register(Box::new(
        GaugeMetric::new(names::THROUGHPUT, 42.5).with_description("rows/s"),
    ));

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.get(names::THROUGHPUT), Some(&json!(42.5)));
    assert!(collector.summary().contains("(rows/s)"));
}

#[test]
fn test_histogram_metric() {
    let collector = MetricsCollector::new();
    for rows in [1.0, 2.0, 3.0, 4.0, 5.0] {
        collector.record_histogram(names::CHUNK_ROWS, rows);
    }

    let snapshot = collector.snapshot();
    let hist = &snapshot[names::CHUNK_ROWS];
    assert_eq!(hist["count"], json!(5));
    assert_eq!(hist["mean"], json!(3.0));
    assert_eq!(hist["max"], json!(5.0));

    let mut h = HistogramMetric::new("empty");
    assert_eq!(h.stats().count, 0);
    h.record(7.0);
    assert_eq!(h.stats().p95, 7.0);
}

#[test]
fn test_increment_counter() {
    let collector = MetricsCollector::new();
    assert_eq!(collector.increment_counter(names::ROWS_PROCESSED, 1), 1);
    assert_eq!(collector.increment_counter(names::ROWS_PROCESSED, 5), 6);
    assert_eq!(collector.counter(names::ROWS_PROCESSED), Some(6));
    assert_eq!(collector.counter("unknown"), None);
}

#[test]
fn test_clones_share_state() {
    let collector = MetricsCollector::new();
    let handle = collector.clone();
    handle.increment_counter(names::CHUNKS_LOADED, 3);
    assert_eq!(collector.counter(names::CHUNKS_LOADED), Some(3));
}

#[test]
fn test_save_to_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("metrics.json");
    let collector = MetricsCollector::new();
    collector.record_start();
    collector.set_counter(names::ROWS_MERGED, 10);
    collector.record_end();
    collector.save_to_file(&path)?;

    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(saved[names::ROWS_MERGED]["value"], json!(10));
    assert!(saved.get("execution_time_ms").is_some());
    Ok(())
}
