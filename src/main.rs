mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, IndexArgs, LoadArgs};
use shardload::{
    EngineConfig, ExecMode, IndexBuilder, IndexConfig, IngestError, LoadConfig, LoadReport, Runner,
    StoreEngine,
};
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const PROBE_COUNTRY: &str = "US";

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Load(args) => load(&args),
        Command::Index(args) => index(&args).map(|()| ExitCode::SUCCESS),
    };
    match outcome {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<IngestError>() {
                Some(ingest) if ingest.is_fatal() => error!("{ingest}"),
                _ => error!("{e:#}"),
            }
            ExitCode::from(1)
        }
    }
}

fn load(args: &LoadArgs) -> Result<ExitCode> {
    let engine = EngineConfig::default().with_memory_limit(args.memory_limit);
    let mode = if args.direct {
        ExecMode::Direct
    } else {
        ExecMode::Chunked {
            workers: args.workers,
            rows_per_chunk: args.chunk_size,
        }
    };
    let mut cfg = LoadConfig::new(&args.file, &args.db_path)
        .with_workspace(&args.temp_dir)
        .with_mode(mode)
        .with_compression(args.compression)
        .with_engine(engine.clone());
    if let Some(rows) = args.expected_rows {
        cfg = cfg.with_expected_rows(rows);
    }

    let runner = Runner::new();
    let report = runner.run(&cfg)?;

    if args.no_index {
        info!("Skipping index creation");
    } else {
        let index_cfg = IndexConfig::new(&args.db_path)
            .with_column_list(&args.index_columns)
            .with_engine(engine.clone());
        index_cfg.validate()?;
        let built = IndexBuilder::new(StoreEngine::new(engine.clone())).build(
            &index_cfg.target,
            &index_cfg.specs(),
            index_cfg.run_mode,
        )?;
        if !built.all_built() {
            warn!(failed = built.failed.len(), "some indexes were not built");
        }
    }

    if let Err(e) = probe(&args.db_path, &StoreEngine::new(engine)) {
        warn!(error = %e, "probe query failed");
    }
    print_summary(&report);

    if let Some(path) = &args.metrics_out {
        runner
            .metrics()
            .save_to_file(path)
            .with_context(|| format!("saving metrics to {}", path.display()))?;
        info!(path = %path.display(), "metrics written");
    }

    if args.strict && !report.reconciliation.is_complete() {
        error!(reconciliation = %report.reconciliation, "strict mode: load did not reconcile");
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn index(args: &IndexArgs) -> Result<()> {
    let engine = EngineConfig::default().with_memory_limit(args.memory_limit);
    let cfg = IndexConfig::new(&args.db_path)
        .with_column_list(&args.fields)
        .with_sample_fraction(args.sample_size)
        .with_run_mode(args.run_mode())
        .with_refresh_stats(!args.no_analyze)
        .with_engine(engine);
    cfg.validate()?;

    let report = IndexBuilder::new(StoreEngine::new(cfg.engine.clone()))
        .with_refresh_stats(cfg.refresh_stats)
        .build(&cfg.target, &cfg.specs(), cfg.run_mode)?;
    for e in &report.failed {
        warn!("{e}");
    }
    Ok(())
}

/// Timed lookup on the target, logged for a quick sanity check.
fn probe(target: &Path, engine: &StoreEngine) -> shardload::Result<()> {
    let store = engine.open(target)?;
    let started = Instant::now();
    let hits = store.count_where("country", PROBE_COUNTRY)?;
    info!(
        "Probe: {hits} rows with country = '{PROBE_COUNTRY}' in {:.3} seconds",
        started.elapsed().as_secs_f64()
    );
    store.close()
}

fn print_summary(report: &LoadReport) {
    let secs = report.elapsed.as_secs_f64();
    println!("\nLoad summary");
    println!("  Rows merged:   {}", report.rows_merged);
    println!("  Elapsed:       {secs:.2} s");
    if secs > 60.0 {
        println!("                 {:.2} min", secs / 60.0);
    }
    println!("  Throughput:    {:.0} rows/s", report.throughput());
    if let Some(bytes) = report.target_bytes {
        #[allow(clippy::cast_precision_loss)]
        let mib = bytes as f64 / (1024.0 * 1024.0);
        println!("  Table size:    {mib:.2} MiB");
    }
    if let Some(ratio) = report.storage_ratio() {
        println!("  Storage ratio: {ratio:.2}x input");
    }
    println!("  Reconciliation: {}", report.reconciliation);
}
