//! Sequential fold of intermediate stores into the target.
//!
//! The merger is the only writer to the target while ingestion runs. Stores
//! are taken in the order given; since every store holds a disjoint row set
//! the order only affects log readability.
//!
//! Each store is merged atomically: its rows are counted and copied inside one
//! transaction on the target, so a store that fails part-way (a malformed page,
//! a schema mismatch) contributes nothing and is left on disk for inspection.
//! Successfully merged stores are deleted.

use crate::error::{IngestError, Result};
use crate::loader::IntermediateStore;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Files smaller than this are treated as empty or corrupt and never attached.
pub const MIN_VIABLE_STORE_BYTES: u64 = 1000;

const ATTACH_PREFIX: &str = "chunk_src";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    pub min_store_bytes: u64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            min_store_bytes: MIN_VIABLE_STORE_BYTES,
        }
    }
}

/// Why a store did not contribute rows.
#[derive(Debug)]
pub enum SkipReason {
    Missing,
    BelowThreshold { bytes: u64 },
    /// The merge itself failed; the file is preserved.
    Failed(IngestError),
}

#[derive(Debug)]
pub struct SkippedStore {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct MergeSummary {
    pub rows_merged: u64,
    pub merged: usize,
    pub skipped: Vec<SkippedStore>,
}

impl MergeSummary {
    /// Stores whose merge failed and which remain on disk.
    pub fn preserved(&self) -> impl Iterator<Item = &SkippedStore> {
        self.skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::Failed(_)))
    }
}

/// Merge every store into `target`, returning what was merged and what was skipped.
///
/// # Errors
/// Only a failure to create the target schema is returned; per-store failures
/// are recorded in [`MergeSummary::skipped`].
pub fn merge_stores<I>(target: &mut Store, stores: I, options: &MergeOptions) -> Result<MergeSummary>
where
    I: IntoIterator<Item = IntermediateStore>,
{
    target.create_schema()?;
    let stores: Vec<IntermediateStore> = stores.into_iter().collect();
    let total = stores.len();
    let mut summary = MergeSummary::default();

    for (i, store) in stores.into_iter().enumerate() {
        let path = store.into_path();

        let bytes = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(store = %path.display(), "store missing; skipped");
                summary.skipped.push(SkippedStore { path, reason: SkipReason::Missing });
                continue;
            }
            Err(e) => {
                let cause = IngestError::Merge {
                    path: path.clone(),
                    reason: e.to_string(),
                };
                error!(error = %cause, "cannot stat store; skipped");
                summary.skipped.push(SkippedStore { path, reason: SkipReason::Failed(cause) });
                continue;
            }
        };
        if bytes < options.min_store_bytes {
            warn!(
                store = %path.display(),
                bytes,
                threshold = options.min_store_bytes,
                "store below viability threshold; skipped"
            );
            summary.skipped.push(SkippedStore {
                path,
                reason: SkipReason::BelowThreshold { bytes },
            });
            continue;
        }

        info!("Merging store {}/{}: {}", i + 1, total, path.display());
        match merge_one(target, &path, &format!("{ATTACH_PREFIX}_{i}")) {
            Ok(rows) => {
                summary.rows_merged += rows;
                summary.merged += 1;
                if let Err(e) = fs::remove_file(&path) {
                    warn!(store = %path.display(), error = %e, "merged store not removed");
                }
            }
            Err(e) => {
                let cause = IngestError::Merge {
                    path: path.clone(),
                    reason: e.to_string(),
                };
                error!(error = %cause, "merge failed; store kept for recovery");
                summary.skipped.push(SkippedStore { path, reason: SkipReason::Failed(cause) });
            }
        }
    }

    info!(
        merged = summary.merged,
        skipped = summary.skipped.len(),
        rows = summary.rows_merged,
        "merge finished"
    );
    Ok(summary)
}

/// Each store gets its own alias so a lingering attachment cannot block the next one.
fn merge_one(target: &mut Store, path: &std::path::Path, alias: &str) -> Result<u64> {
    target.attach(path, alias)?;
    let appended = target.append_from(alias);
    if let Err(e) = target.detach(alias) {
        warn!(store = %path.display(), error = %e, "detach failed");
    }
    appended
}
