//! Catalog persistence: trait surface plus the Postgres and in-memory backends.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::canonical::CanonicalProduct;

/// A persisted catalog row: the canonical product plus its store identity.
#[derive(Debug, Clone, Serialize)]
pub struct ProductRow {
    pub id: i64,
    #[serde(flatten)]
    pub product: CanonicalProduct,
}

/// Idempotent catalog storage keyed by barcode.
///
/// Both insert operations ignore barcode conflicts rather than erroring, so
/// re-running an import or racing a concurrent writer is always safe.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fetch the persisted row for a barcode, if present.
    async fn get(&self, barcode: &str) -> Result<Option<ProductRow>>;

    /// Insert many products, skipping barcodes that already exist.
    /// Returns the number of rows actually written.
    async fn insert_batch(&self, products: &[CanonicalProduct]) -> Result<u64>;

    /// Insert a single product. `Ok(None)` means the barcode already existed
    /// when the write landed; the caller must re-read to get the winning row.
    async fn insert(&self, product: &CanonicalProduct) -> Result<Option<ProductRow>>;
}
