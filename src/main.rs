use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use floupet_catalog::connector::{OpffClient, OpffConfig};
use floupet_catalog::logging::init_tracing;
use floupet_catalog::pipeline::{run_import, DEFAULT_BATCH_SIZE};
use floupet_catalog::resolver::resolve;
use floupet_catalog::store::postgres::PgCatalog;
use floupet_catalog::util::env;

#[derive(Parser)]
#[command(
    name = "floupet-catalog",
    version,
    about = "Pet food catalog tooling: bulk OPFF import and barcode lookup"
)]
#[command(rename_all = "kebab-case")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Download the full OPFF dump and import it into the catalog
    Import {
        /// Postgres DSN; falls back to DATABASE_URL and friends
        #[arg(long)]
        db_url: Option<String>,
        /// Override the dump URL (e.g. a local mirror)
        #[arg(long)]
        dump_url: Option<String>,
        /// Rows per insert batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Resolve one barcode: catalog first, then the OPFF API with write-back
    Lookup {
        barcode: String,
        /// Postgres DSN; falls back to DATABASE_URL and friends
        #[arg(long)]
        db_url: Option<String>,
        /// Per-request timeout for the upstream API, in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

fn resolve_db_url(flag: Option<String>) -> Result<String> {
    match flag {
        Some(url) => Ok(url),
        None => env::db_url(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info")?;
    let cli = Cli::parse();

    match cli.command {
        Command::Import {
            db_url,
            dump_url,
            batch_size,
        } => {
            let store = PgCatalog::connect(&resolve_db_url(db_url)?, 5).await?;
            store.ensure_schema().await?;

            let mut config = OpffConfig::default();
            if let Some(url) = dump_url {
                config.dump_url = url;
            }
            let client = OpffClient::new(config)?;

            let stats = run_import(&client, &store, batch_size).await?;
            println!("Import complete");
            println!("  Total lines:    {}", stats.total_lines);
            println!("  Inserted:       {}", stats.inserted);
            println!("  Skipped:        {}", stats.skipped);
            println!("  Failed batches: {}", stats.failed_batches);
        }
        Command::Lookup {
            barcode,
            db_url,
            timeout_secs,
        } => {
            let store = PgCatalog::connect(&resolve_db_url(db_url)?, 2).await?;
            store.ensure_schema().await?;

            let config = OpffConfig {
                request_timeout: Duration::from_secs(timeout_secs),
                ..OpffConfig::default()
            };
            let client = OpffClient::new(config)?;

            let resolution = resolve(&store, &client, &barcode).await;
            info!(%barcode, source = ?resolution.source, "lookup finished");
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }
    }
    Ok(())
}
