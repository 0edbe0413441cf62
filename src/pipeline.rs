//! Bulk import pipeline: dump download, line decode, canonicalization,
//! batching and idempotent writes, with counters for the final summary.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::batcher::Batcher;
use crate::canonical::{canonicalize, CanonicalProduct, RawProduct};
use crate::connector::OpffClient;
use crate::reader::RecordLines;
use crate::store::CatalogStore;

pub const DEFAULT_BATCH_SIZE: usize = 100;

// Progress log cadence, in lines.
const PROGRESS_EVERY: u64 = 10_000;

/// Counters for one import run. `skipped` covers undecodable lines and
/// records rejected by canonicalization; rows suppressed by barcode conflicts
/// simply do not count toward `inserted`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportStats {
    pub total_lines: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub failed_batches: u64,
}

/// Run a full dump import into the store.
///
/// Only a failed download or stream read aborts the run. A failed batch write
/// is logged, counted, and skipped; the rest of the dump still imports.
pub async fn run_import(
    client: &OpffClient,
    store: &dyn CatalogStore,
    batch_size: usize,
) -> Result<ImportStats> {
    let mut dump = client
        .open_dump()
        .await
        .context("could not open product dump")?;
    let mut lines = RecordLines::new(dump.reader_mut());

    let mut stats = ImportStats::default();
    let mut batcher: Batcher<CanonicalProduct> = Batcher::new(batch_size);

    while let Some(line) = lines.next_record().await.context("dump stream failed")? {
        stats.total_lines += 1;
        if stats.total_lines % PROGRESS_EVERY == 0 {
            info!(
                total_lines = stats.total_lines,
                inserted = stats.inserted,
                skipped = stats.skipped,
                "import progress"
            );
        }

        let raw: RawProduct = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(_) => {
                stats.skipped += 1;
                continue;
            }
        };
        let Some(product) = canonicalize(&raw) else {
            stats.skipped += 1;
            continue;
        };
        if let Some(batch) = batcher.push(product) {
            flush_batch(store, &batch, &mut stats).await;
        }
    }
    if let Some(batch) = batcher.flush() {
        flush_batch(store, &batch, &mut stats).await;
    }

    info!(
        total_lines = stats.total_lines,
        inserted = stats.inserted,
        skipped = stats.skipped,
        failed_batches = stats.failed_batches,
        "import finished"
    );
    Ok(stats)
}

async fn flush_batch(store: &dyn CatalogStore, batch: &[CanonicalProduct], stats: &mut ImportStats) {
    match store.insert_batch(batch).await {
        Ok(written) => stats.inserted += written,
        Err(error) => {
            stats.failed_batches += 1;
            warn!(
                batch_len = batch.len(),
                failed_batches = stats.failed_batches,
                %error,
                "batch insert failed, continuing"
            );
        }
    }
}
