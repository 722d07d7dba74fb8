//! Single-pass load of the whole input straight into the target.
//!
//! No chunking, no workspace, no merge: one engine bulk load inside one
//! transaction. It either lands completely or fails the run. This is the only
//! path for compressed inputs, and the better one when the file is small.

use crate::error::Result;
use crate::io::compression::Compression;
use crate::store::StoreEngine;
use std::path::Path;
use tracing::info;

/// Load `input` into the store at `target` and return the target's row count.
///
/// The returned count is read back from the target after the load, so it
/// includes any rows the target already held.
///
/// # Errors
/// Any failure is returned as-is; there is no partial outcome.
pub fn load_direct(
    input: &Path,
    target: &Path,
    compression: Compression,
    engine: &StoreEngine,
) -> Result<u64> {
    info!(input = %input.display(), %compression, "direct load");
    let mut store = engine.open(target)?;
    store.create_schema()?;
    let inserted = store.bulk_load(input, compression)?;
    let total = store.count_rows()?;
    store.close()?;
    info!(inserted, total, "direct load committed");
    Ok(total)
}
