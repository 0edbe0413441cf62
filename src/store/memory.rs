//! In-memory catalog backend for tests and offline runs.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::{CatalogStore, ProductRow};
use crate::canonical::CanonicalProduct;

#[derive(Default)]
struct Inner {
    rows: HashMap<String, ProductRow>,
    next_id: i64,
    batch_sizes: Vec<usize>,
}

/// Hash-map backed store with the same conflict semantics as Postgres:
/// first writer per barcode wins, later writes are ignored.
#[derive(Default)]
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes of the batches received so far, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).batch_sizes.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn insert_one(&mut self, product: &CanonicalProduct) -> Option<ProductRow> {
        if self.rows.contains_key(&product.barcode) {
            return None;
        }
        self.next_id += 1;
        let row = ProductRow {
            id: self.next_id,
            product: product.clone(),
        };
        self.rows.insert(product.barcode.clone(), row.clone());
        Some(row)
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get(&self, barcode: &str) -> Result<Option<ProductRow>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.rows.get(barcode).cloned())
    }

    async fn insert_batch(&self, products: &[CanonicalProduct]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.batch_sizes.push(products.len());
        let mut written = 0;
        for product in products {
            if inner.insert_one(product).is_some() {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn insert(&self, product: &CanonicalProduct) -> Result<Option<ProductRow>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.insert_one(product))
    }
}
