//! Postgres catalog backend.
//!
//! Conflict handling is done in SQL: every insert carries
//! `ON CONFLICT (barcode) DO NOTHING`, so concurrent writers and repeated
//! imports converge on one row per barcode without application-level locking.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode},
    PgPool, QueryBuilder, Row,
};
use tracing::{info, instrument};

use super::{CatalogStore, ProductRow};
use crate::canonical::{CanonicalProduct, ProductType};
use crate::util::env::{env_flag, env_parse};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS products (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    barcode TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    brand TEXT,
    product_type TEXT NOT NULL DEFAULT 'other',
    net_weight_g DOUBLE PRECISION,
    grams_per_unit DOUBLE PRECISION,
    kcal_per_100g DOUBLE PRECISION,
    photo_url TEXT,
    verified BOOLEAN NOT NULL DEFAULT FALSE,
    created_by TEXT
)";

const ROW_COLUMNS: &str =
    "id, barcode, name, brand, product_type, net_weight_g, grams_per_unit, \
     kcal_per_100g, photo_url, verified, created_by";

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)
            .context("invalid database URL")?;

        // Be explicit about TLS when the DSN asks for it.
        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let statement_timeout_ms: u64 = env_parse("DB_STATEMENT_TIMEOUT_MS", 0);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if statement_timeout_ms > 0 {
                        // Best-effort; do not block startup in restricted envs
                        let _ = sqlx::query(&format!(
                            "SET statement_timeout = '{}ms'",
                            statement_timeout_ms
                        ))
                        .execute(&mut *conn)
                        .await;
                    }
                    Ok(())
                })
            })
            .connect_with(connect_options)
            .await
            .context("failed to connect to database")?;
        info!("connected to db");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the products table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("failed to ensure products schema")?;
        Ok(())
    }
}

fn row_from_pg(row: &PgRow) -> Result<ProductRow> {
    let product_type: String = row.try_get("product_type")?;
    Ok(ProductRow {
        id: row.try_get("id")?,
        product: CanonicalProduct {
            barcode: row.try_get("barcode")?,
            name: row.try_get("name")?,
            brand: row.try_get("brand")?,
            product_type: ProductType::from_label(&product_type),
            net_weight_g: row.try_get("net_weight_g")?,
            grams_per_unit: row.try_get("grams_per_unit")?,
            kcal_per_100g: row.try_get("kcal_per_100g")?,
            photo_url: row.try_get("photo_url")?,
            verified: row.try_get("verified")?,
            created_by: row.try_get("created_by")?,
        },
    })
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn get(&self, barcode: &str) -> Result<Option<ProductRow>> {
        let row = sqlx::query(&format!(
            "SELECT {ROW_COLUMNS} FROM products WHERE barcode = $1"
        ))
        .bind(barcode)
        .persistent(false)
        .fetch_optional(&self.pool)
        .await
        .context("product lookup query failed")?;
        row.as_ref().map(row_from_pg).transpose()
    }

    async fn insert_batch(&self, products: &[CanonicalProduct]) -> Result<u64> {
        if products.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new(
            "INSERT INTO products (barcode, name, brand, product_type, net_weight_g, \
             grams_per_unit, kcal_per_100g, photo_url, verified, created_by) ",
        );
        qb.push_values(products, |mut b, p| {
            b.push_bind(&p.barcode)
                .push_bind(&p.name)
                .push_bind(&p.brand)
                .push_bind(p.product_type.as_str())
                .push_bind(p.net_weight_g)
                .push_bind(p.grams_per_unit)
                .push_bind(p.kcal_per_100g)
                .push_bind(&p.photo_url)
                .push_bind(p.verified)
                .push_bind(&p.created_by);
        });
        qb.push(" ON CONFLICT (barcode) DO NOTHING");

        let result = qb
            .build()
            .persistent(false)
            .execute(&self.pool)
            .await
            .context("batch insert failed")?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, product: &CanonicalProduct) -> Result<Option<ProductRow>> {
        // RETURNING yields no row when the conflict clause suppressed the
        // insert; the caller re-reads to find the row that won.
        let row = sqlx::query(&format!(
            "INSERT INTO products (barcode, name, brand, product_type, net_weight_g, \
             grams_per_unit, kcal_per_100g, photo_url, verified, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (barcode) DO NOTHING \
             RETURNING {ROW_COLUMNS}"
        ))
        .bind(&product.barcode)
        .bind(&product.name)
        .bind(&product.brand)
        .bind(product.product_type.as_str())
        .bind(product.net_weight_g)
        .bind(product.grams_per_unit)
        .bind(product.kcal_per_100g)
        .bind(&product.photo_url)
        .bind(product.verified)
        .bind(&product.created_by)
        .persistent(false)
        .fetch_optional(&self.pool)
        .await
        .context("single insert failed")?;
        row.as_ref().map(row_from_pg).transpose()
    }
}
