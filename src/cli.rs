use clap::{Args, Parser, Subcommand};
use shardload::config::MemoryLimit;
use shardload::index::RunMode;
use shardload::io::compression::Compression;
use shardload::runner::{DEFAULT_ROWS_PER_CHUNK, DEFAULT_WORKERS};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shardload", version, about = "Bulk-load large delimited files into SQLite")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a delimited file into the target store.
    Load(LoadArgs),
    /// Build secondary indexes on an existing target store.
    Index(IndexArgs),
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Input file (`;`-delimited, no header).
    #[arg(long)]
    pub file: PathBuf,

    /// Target store file.
    #[arg(long)]
    pub db_path: PathBuf,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Rows per chunk in chunked mode.
    #[arg(long, default_value_t = DEFAULT_ROWS_PER_CHUNK)]
    pub chunk_size: u64,

    /// Load in one pass without chunking. Required for compressed input.
    #[arg(long)]
    pub direct: bool,

    /// Engine memory ceiling per connection, e.g. `8GB` or `512MiB`.
    #[arg(long, default_value = "8GB")]
    pub memory_limit: MemoryLimit,

    #[arg(long, value_enum, default_value_t = Compression::None)]
    pub compression: Compression,

    /// Scratch directory for chunk files and intermediate stores.
    #[arg(long, default_value = "./temp_dbs")]
    pub temp_dir: PathBuf,

    /// Row-count estimate for chunk planning. The input is counted when omitted.
    #[arg(long)]
    pub expected_rows: Option<u64>,

    /// Skip index creation after loading.
    #[arg(long)]
    pub no_index: bool,

    /// Comma-separated columns to index after loading.
    #[arg(long, default_value = "domain,ip,country")]
    pub index_columns: String,

    /// Exit with status 2 when the load does not reconcile.
    #[arg(long)]
    pub strict: bool,

    /// Write run metrics as JSON to this file.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    #[arg(long)]
    pub db_path: PathBuf,

    #[arg(long, default_value = "8GB")]
    pub memory_limit: MemoryLimit,

    /// Build all indexes concurrently (experimental).
    #[arg(long)]
    pub parallel: bool,

    /// Fraction of rows used for the warm-up sample index; 1.0 disables sampling.
    #[arg(long, default_value_t = 1.0)]
    pub sample_size: f64,

    /// Comma-separated columns to index.
    #[arg(long, default_value = "domain,ip,country")]
    pub fields: String,

    /// Skip the statistics refresh after building.
    #[arg(long)]
    pub no_analyze: bool,
}

impl IndexArgs {
    pub fn run_mode(&self) -> RunMode {
        if self.parallel {
            RunMode::Parallel
        } else {
            RunMode::Serial
        }
    }
}
