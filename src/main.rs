//! Elohim Remote Store maintenance tool
//!
//! Pushes and pulls record data through the same blob store the node uses,
//! for inspecting or repairing a node's remote storage by hand.
//!
//! ## Usage
//!
//! ```bash
//! # Upload a file as the data of a record
//! elohim-remote-store put did:example:alice record-1 ./photo.jpg
//!
//! # Download it again
//! elohim-remote-store get did:example:alice record-1 bafkrei... --out photo.jpg
//!
//! # Local mapping counts
//! elohim-remote-store stats
//! ```
//!
//! Configuration comes from the same `REMOTE_STORE_*` variables as the node;
//! flags override them.

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use elohim_remote_store::blob_store::single_chunk_stream;
use elohim_remote_store::{content_id, BlobStore, Config, DataStore, RemoteBlobClient};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "elohim-remote-store")]
#[command(about = "Inspect and maintain remote blob storage for Elohim nodes")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "REMOTE_STORE_CONFIG")]
    config: Option<PathBuf>,

    /// Remote network credential
    #[arg(long, env = "REMOTE_STORE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Remote network RPC endpoint
    #[arg(long, env = "REMOTE_STORE_RPC_URL")]
    rpc_url: Option<String>,

    /// Local data directory
    #[arg(long, env = "REMOTE_STORE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file as a record's data
    Put {
        tenant: String,
        record_id: String,
        file: PathBuf,
        /// CID to store under (defaults to the raw CID of the file)
        #[arg(long)]
        cid: Option<String>,
    },
    /// Download a record's data
    Get {
        tenant: String,
        record_id: String,
        cid: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Forget a record's data mapping (the remote piece is kept)
    Delete {
        tenant: String,
        record_id: String,
        cid: String,
    },
    /// Show local mapping counts
    Stats,
    /// Forget every data mapping
    Clear,
}

fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    // clap already folded REMOTE_STORE_CONFIG into `args.config`
    let mut config =
        Config::from_env_with_file(args.config.as_deref()).with_context(|| match &args.config {
            Some(path) => format!("loading config from {}", path.display()),
            None => "reading configuration from the environment".to_string(),
        })?;

    if let Some(key) = &args.api_key {
        config.api_key = Some(key.clone());
    }
    if let Some(url) = &args.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.storage_dir = dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("elohim_remote_store=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;

    info!(
        rpc_url = %config.rpc_url,
        data_dir = %config.storage_dir.display(),
        "Starting elohim-remote-store"
    );

    let store = BlobStore::new(Arc::new(RemoteBlobClient::new(config)));
    store.open().await?;

    let outcome = run(&store, args.command).await;
    store.close().await?;
    outcome
}

async fn run(store: &BlobStore, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Put {
            tenant,
            record_id,
            file,
            cid,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let cid = cid.unwrap_or_else(|| content_id::compute_raw(&data));
            let size = store
                .put(&tenant, &record_id, &cid, single_chunk_stream(Bytes::from(data)), None)
                .await?;
            println!("{} {}", cid, size);
        }
        Command::Get {
            tenant,
            record_id,
            cid,
            out,
        } => {
            let Some(mut result) = store.get(&tenant, &record_id, &cid, None).await? else {
                anyhow::bail!("no data for {} / {} / {}", tenant, record_id, cid);
            };
            let mut data = Vec::with_capacity(result.data_size as usize);
            while let Some(chunk) = result.data_stream.next().await {
                data.extend_from_slice(&chunk?);
            }
            match out {
                Some(path) => tokio::fs::write(&path, &data).await?,
                None => {
                    use tokio::io::AsyncWriteExt;
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Delete {
            tenant,
            record_id,
            cid,
        } => {
            store.delete(&tenant, &record_id, &cid).await?;
            info!(tenant = %tenant, record_id = %record_id, cid = %cid, "Mapping removed");
        }
        Command::Stats => {
            let stats = store.stats().await?;
            println!("data mappings: {}", stats.mapped_pieces);
        }
        Command::Clear => {
            store.clear().await?;
        }
    }
    Ok(())
}
