//! Open Pet Food Facts HTTP connector: bulk dump download and single-product
//! lookups share one configured client.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_compression::tokio::bufread::GzipDecoder;
use futures::TryStreamExt;
use reqwest::Client;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio_util::io::StreamReader;
use tracing::info;

use crate::canonical::RawProduct;
use crate::util::env::env_parse;

pub const DEFAULT_DUMP_URL: &str =
    "https://world.openpetfoodfacts.org/data/en.openpetfoodfacts.org.products.jsonl.gz";
pub const DEFAULT_PRODUCT_API: &str = "https://world.openpetfoodfacts.org/api/v2/product";

// Upstream asks bulk consumers to identify themselves.
const USER_AGENT: &str = "Floupet/1.0 (contact@floupet.app)";

#[derive(Debug, Clone)]
pub struct OpffConfig {
    pub dump_url: String,
    pub product_api: String,
    /// Deadline for single-product lookups; also bounds each individual read
    /// on the dump stream, so a stalled server errors instead of hanging.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for OpffConfig {
    fn default() -> Self {
        Self {
            dump_url: DEFAULT_DUMP_URL.to_string(),
            product_api: DEFAULT_PRODUCT_API.to_string(),
            request_timeout: Duration::from_secs(env_parse("OPFF_REQUEST_TIMEOUT_SECS", 30)),
            connect_timeout: Duration::from_secs(env_parse("OPFF_CONNECT_TIMEOUT_SECS", 10)),
        }
    }
}

pub struct OpffClient {
    client: Client,
    config: OpffConfig,
}

/// Decompressed dump ready for line-by-line reading. The downloaded archive
/// lives in a scratch file that is removed when this value drops.
pub struct DumpStream {
    _scratch: NamedTempFile,
    reader: BufReader<GzipDecoder<BufReader<File>>>,
}

impl DumpStream {
    pub fn reader_mut(&mut self) -> &mut BufReader<GzipDecoder<BufReader<File>>> {
        &mut self.reader
    }
}

#[derive(Deserialize)]
struct ProductEnvelope {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    product: Option<RawProduct>,
}

impl OpffClient {
    pub fn new(config: OpffConfig) -> Result<Self> {
        // No client-wide total timeout: the dump download runs for as long as
        // it needs. The read timeout bounds each read on the body instead, so
        // a stalled stream fails without capping total download time.
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client, config })
    }

    /// Download the gzipped JSONL dump into a scratch file and hand back a
    /// decompressing reader over it. Peak memory stays at buffer size no
    /// matter how large the dump is.
    pub async fn open_dump(&self) -> Result<DumpStream> {
        let url = &self.config.dump_url;
        info!(url, "downloading product dump");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("dump request to {url} failed"))?;
        if !response.status().is_success() {
            bail!("dump download from {url} returned {}", response.status());
        }

        let scratch = NamedTempFile::new().context("failed to create scratch file")?;
        let path = scratch.path().to_path_buf();

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut body = StreamReader::new(stream);
        let mut out = File::create(&path)
            .await
            .context("failed to open scratch file for writing")?;
        let bytes = tokio::io::copy(&mut body, &mut out)
            .await
            .context("dump download interrupted")?;
        out.sync_all().await.context("failed to flush scratch file")?;
        info!(bytes, "dump download complete");

        let raw = File::open(&path)
            .await
            .context("failed to reopen scratch file")?;
        // 1 MiB buffer under the decoder for fewer syscalls on the big dump
        let decoder = GzipDecoder::new(BufReader::with_capacity(1 << 20, raw));
        Ok(DumpStream {
            _scratch: scratch,
            reader: BufReader::new(decoder),
        })
    }

    /// Single-product lookup. `Ok(None)` covers every "not found" shape the
    /// upstream produces: non-2xx status, envelope status != 1, or a missing
    /// product body. Transport errors stay errors.
    pub async fn fetch_product(&self, barcode: &str) -> Result<Option<RawProduct>> {
        let url = format!("{}/{}.json", self.config.product_api, barcode);
        let response = self
            .client
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .with_context(|| format!("product request to {url} failed"))?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let envelope: ProductEnvelope = response
            .json()
            .await
            .with_context(|| format!("invalid product response from {url}"))?;
        if envelope.status != 1 {
            return Ok(None);
        }
        Ok(envelope.product)
    }
}
