//! Testing utilities for load pipelines.
//!
//! Used by this crate's own tests and available to anyone embedding the
//! loader:
//!
//! - **Fixtures**: deterministic input rows and files, optionally compressed
//! - **Assertions**: structural checks on chunk plans and stores
//! - [`init_tracing_for_tests`]: a one-time `tracing` subscriber honouring `RUST_LOG`
//!
//! # Quick Start
//!
//! ```no_run
//! use shardload::io::compression::Compression;
//! use shardload::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let input = dir.path().join("domains.csv");
//! write_rows_file(&input, 100, true, Compression::None)?;
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a test-friendly `tracing` subscriber once per process.
///
/// Defaults to `info`; set `RUST_LOG` for anything else.
pub fn init_tracing_for_tests() {
    INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init()
            .ok();
    });
}
