//! End-to-end import tests: gzipped JSONL dump served over HTTP, decoded and
//! written through the batching pipeline into an in-memory store.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use floupet_catalog::canonical::{CanonicalProduct, ProductType};
use floupet_catalog::connector::{OpffClient, OpffConfig};
use floupet_catalog::pipeline::{run_import, DEFAULT_BATCH_SIZE};
use floupet_catalog::store::memory::MemoryCatalog;
use floupet_catalog::store::{CatalogStore, ProductRow};

fn gzip(lines: &[String]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    encoder.finish().unwrap()
}

async fn serve_dump(lines: &[String]) -> (MockServer, OpffClient) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dump.jsonl.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(gzip(lines)))
        .mount(&server)
        .await;
    let config = OpffConfig {
        dump_url: format!("{}/dump.jsonl.gz", server.uri()),
        product_api: format!("{}/api/v2/product", server.uri()),
        ..OpffConfig::default()
    };
    (server, OpffClient::new(config).unwrap())
}

fn dump_line(barcode: u64) -> String {
    format!(
        "{{\"code\":\"{barcode}\",\"product_name\":\"Product {barcode}\",\
         \"categories_tags\":[\"en:dry-dog-food\"]}}"
    )
}

#[tokio::test]
async fn imports_and_maps_a_wet_food_record() {
    let lines = vec![
        "{\"code\":\"12345\",\"product_name\":\"Pâtée Saumon\",\
         \"categories_tags\":[\"en:wet-pet-food\"],\"product_quantity\":\"400 g\",\
         \"brands\":\"Brand X\",\"nutriments\":{\"energy-kcal_100g\":\"95\"}}"
            .to_string(),
    ];
    let (_server, client) = serve_dump(&lines).await;
    let store = MemoryCatalog::new();

    let stats = run_import(&client, &store, DEFAULT_BATCH_SIZE).await.unwrap();
    assert_eq!(stats.total_lines, 1);
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.failed_batches, 0);

    let row = store.get("12345").await.unwrap().unwrap();
    assert_eq!(row.product.name, "Pâtée Saumon");
    assert_eq!(row.product.brand.as_deref(), Some("Brand X"));
    assert_eq!(row.product.product_type, ProductType::WetFood);
    assert_eq!(row.product.net_weight_g, Some(400.0));
    assert_eq!(row.product.kcal_per_100g, Some(95.0));
    assert!(row.product.verified);
    assert_eq!(row.product.created_by, None);
}

#[tokio::test]
async fn batches_are_capacity_then_remainder() {
    let lines: Vec<String> = (0..150).map(dump_line).collect();
    let (_server, client) = serve_dump(&lines).await;
    let store = MemoryCatalog::new();

    let stats = run_import(&client, &store, 100).await.unwrap();
    assert_eq!(stats.total_lines, 150);
    assert_eq!(stats.inserted, 150);
    assert_eq!(store.batch_sizes(), vec![100, 50]);
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let lines: Vec<String> = (0..30).map(dump_line).collect();
    let (_server, client) = serve_dump(&lines).await;
    let store = MemoryCatalog::new();

    let first = run_import(&client, &store, 10).await.unwrap();
    assert_eq!(first.inserted, 30);
    let second = run_import(&client, &store, 10).await.unwrap();
    assert_eq!(second.total_lines, 30);
    assert_eq!(second.inserted, 0);
    assert_eq!(store.len(), 30);
}

#[tokio::test]
async fn malformed_and_rejected_lines_are_skipped_not_fatal() {
    let lines = vec![
        dump_line(1),
        "not json at all".to_string(),
        "{\"product_name\":\"No Barcode\"}".to_string(),
        "{\"code\":\"2\",\"product_name\":\"   \"}".to_string(),
        "".to_string(),
        dump_line(3),
    ];
    let (_server, client) = serve_dump(&lines).await;
    let store = MemoryCatalog::new();

    let stats = run_import(&client, &store, DEFAULT_BATCH_SIZE).await.unwrap();
    // The blank line never reaches the decoder, so it is not counted at all.
    assert_eq!(stats.total_lines, 5);
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.skipped, 3);
    assert!(store.get("1").await.unwrap().is_some());
    assert!(store.get("3").await.unwrap().is_some());
}

#[tokio::test]
async fn truncated_gzip_aborts_the_run() {
    let lines: Vec<String> = (0..50).map(dump_line).collect();
    let mut body = gzip(&lines);
    body.truncate(body.len() / 2);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dump.jsonl.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;
    let config = OpffConfig {
        dump_url: format!("{}/dump.jsonl.gz", server.uri()),
        product_api: format!("{}/api/v2/product", server.uri()),
        ..OpffConfig::default()
    };
    let client = OpffClient::new(config).unwrap();

    // Corruption mid-archive must be fatal, not a short-but-clean run.
    let store = MemoryCatalog::new();
    assert!(run_import(&client, &store, DEFAULT_BATCH_SIZE).await.is_err());
}

#[tokio::test]
async fn garbage_bytes_abort_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dump.jsonl.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"this is not gzip".to_vec()))
        .mount(&server)
        .await;
    let config = OpffConfig {
        dump_url: format!("{}/dump.jsonl.gz", server.uri()),
        product_api: format!("{}/api/v2/product", server.uri()),
        ..OpffConfig::default()
    };
    let client = OpffClient::new(config).unwrap();

    let store = MemoryCatalog::new();
    assert!(run_import(&client, &store, DEFAULT_BATCH_SIZE).await.is_err());
}

#[tokio::test]
async fn stalled_dump_stream_errors_instead_of_hanging() {
    use tokio::io::AsyncWriteExt;

    // Bare socket server: sends headers and a body prefix, then goes silent
    // while holding the connection open.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000000\r\n\r\npartial")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(socket);
    });

    let config = OpffConfig {
        dump_url: format!("http://{addr}/dump.jsonl.gz"),
        product_api: format!("http://{addr}/api/v2/product"),
        request_timeout: Duration::from_millis(300),
        connect_timeout: Duration::from_secs(5),
    };
    let client = OpffClient::new(config).unwrap();

    let store = MemoryCatalog::new();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        run_import(&client, &store, DEFAULT_BATCH_SIZE),
    )
    .await
    .expect("a stalled dump stream must error, not hang the import");
    assert!(result.is_err());
}

#[tokio::test]
async fn missing_dump_aborts_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let config = OpffConfig {
        dump_url: format!("{}/dump.jsonl.gz", server.uri()),
        product_api: format!("{}/api/v2/product", server.uri()),
        ..OpffConfig::default()
    };
    let client = OpffClient::new(config).unwrap();

    let store = MemoryCatalog::new();
    assert!(run_import(&client, &store, DEFAULT_BATCH_SIZE).await.is_err());
}

/// Fails the first batch write, then delegates. Exercises per-batch failure
/// isolation without a real database outage.
struct FlakyStore {
    inner: MemoryCatalog,
    failures_left: std::sync::atomic::AtomicU32,
}

#[async_trait]
impl CatalogStore for FlakyStore {
    async fn get(&self, barcode: &str) -> Result<Option<ProductRow>> {
        self.inner.get(barcode).await
    }

    async fn insert_batch(&self, products: &[CanonicalProduct]) -> Result<u64> {
        use std::sync::atomic::Ordering;
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("simulated write outage");
        }
        self.inner.insert_batch(products).await
    }

    async fn insert(&self, product: &CanonicalProduct) -> Result<Option<ProductRow>> {
        self.inner.insert(product).await
    }
}

#[tokio::test]
async fn failed_batch_is_counted_and_the_rest_still_imports() {
    let lines: Vec<String> = (0..25).map(dump_line).collect();
    let (_server, client) = serve_dump(&lines).await;
    let store = FlakyStore {
        inner: MemoryCatalog::new(),
        failures_left: std::sync::atomic::AtomicU32::new(1),
    };

    let stats = run_import(&client, &store, 10).await.unwrap();
    assert_eq!(stats.total_lines, 25);
    assert_eq!(stats.failed_batches, 1);
    // First batch of 10 lost, remaining 15 written.
    assert_eq!(stats.inserted, 15);
    assert_eq!(store.inner.len(), 15);
}
