//! On-demand barcode resolution with cache-aside semantics.
//!
//! Order is fixed: local store first, then the upstream API, writing back any
//! upstream hit before answering. Every returned product is a persisted row;
//! when a concurrent writer wins the insert race we re-read and serve their
//! row instead of our own mapping.

use serde::Serialize;
use tracing::warn;

use crate::canonical::{canonicalize, RawProduct};
use crate::connector::OpffClient;
use crate::store::{CatalogStore, ProductRow};

/// Where the answer came from. `Db` covers both a plain cache hit and a lost
/// insert race, since either way the row served is the one already persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedSource {
    Db,
    Upstream,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub source: ResolvedSource,
    pub product: Option<ProductRow>,
}

impl Resolution {
    fn none() -> Self {
        Self {
            source: ResolvedSource::None,
            product: None,
        }
    }
}

/// Resolve one barcode. Never fails: store and upstream errors degrade to a
/// "not found" answer with a warning, so a flaky dependency cannot take the
/// lookup path down.
pub async fn resolve(store: &dyn CatalogStore, client: &OpffClient, barcode: &str) -> Resolution {
    let barcode = barcode.trim();
    if barcode.is_empty() {
        return Resolution::none();
    }

    match store.get(barcode).await {
        Ok(Some(row)) => {
            return Resolution {
                source: ResolvedSource::Db,
                product: Some(row),
            };
        }
        Ok(None) => {}
        Err(error) => {
            // Treat as a miss; upstream may still answer.
            warn!(barcode, %error, "store lookup failed, trying upstream");
        }
    }

    let raw = match client.fetch_product(barcode).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Resolution::none(),
        Err(error) => {
            warn!(barcode, %error, "upstream lookup failed");
            return Resolution::none();
        }
    };

    let raw = fill_missing_code(raw, barcode);
    let Some(product) = canonicalize(&raw) else {
        return Resolution::none();
    };

    match store.insert(&product).await {
        Ok(Some(row)) => Resolution {
            source: ResolvedSource::Upstream,
            product: Some(row),
        },
        // Insert suppressed by conflict: someone else persisted this barcode
        // between our miss and our write. Serve their row.
        Ok(None) => reread_after_race(store, barcode).await,
        Err(error) => {
            warn!(barcode, %error, "write-back failed, re-reading store");
            reread_after_race(store, barcode).await
        }
    }
}

async fn reread_after_race(store: &dyn CatalogStore, barcode: &str) -> Resolution {
    match store.get(barcode).await {
        Ok(Some(row)) => Resolution {
            source: ResolvedSource::Db,
            product: Some(row),
        },
        Ok(None) => Resolution::none(),
        Err(error) => {
            warn!(barcode, %error, "re-read after insert conflict failed");
            Resolution::none()
        }
    }
}

/// Some upstream payloads omit `code`; canonicalization needs it, so fall
/// back to the barcode the caller asked for.
fn fill_missing_code(mut raw: RawProduct, barcode: &str) -> RawProduct {
    let missing = raw
        .code
        .as_deref()
        .map(|c| c.trim().is_empty())
        .unwrap_or(true);
    if missing {
        raw.code = Some(barcode.to_string());
    }
    raw
}
