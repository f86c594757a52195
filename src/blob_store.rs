//! Blob store: unindexed data streams on the remote network
//!
//! Stores the bytes behind a record. Input streams are drained fully into
//! memory before upload, since the network takes a complete buffer. Reads
//! hand back a single-chunk stream.
//!
//! Deleting removes the local mapping only; the piece stays on the network.

use crate::backend::{ByteStream, DataGetResult, DataStore};
use crate::codec::ensure_active;
use crate::error::{Result, StorageError};
use crate::mapping::{check_key_part, MappingStore, DATA_PARTITION};
use crate::remote::RemoteBlobClient;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Local counts, gathered without touching the network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobStoreStats {
    pub mapped_pieces: usize,
}

pub struct BlobStore {
    client: Arc<RemoteBlobClient>,
    open: Mutex<bool>,
}

/// Mapping namespace for one record's data
fn data_namespace(tenant: &str, record_id: &str) -> Result<String> {
    check_key_part("tenant", tenant)?;
    check_key_part("record id", record_id)?;
    Ok(format!("{}\0{}", tenant, record_id))
}

/// Stream that yields `data` once, then ends
pub fn single_chunk_stream(data: Bytes) -> ByteStream {
    stream::once(async move { Ok::<_, std::io::Error>(data) }).boxed()
}

impl BlobStore {
    pub fn new(client: Arc<RemoteBlobClient>) -> Self {
        Self {
            client,
            open: Mutex::new(false),
        }
    }

    /// Store with its own client configured from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Arc::new(RemoteBlobClient::from_env()?)))
    }

    pub async fn is_open(&self) -> bool {
        *self.open.lock().await
    }

    async fn mapping(&self) -> Result<MappingStore> {
        if !self.is_open().await {
            return Err(StorageError::NotOpen("blob store"));
        }
        self.client.mapping(DATA_PARTITION).await
    }

    pub async fn stats(&self) -> Result<BlobStoreStats> {
        let mapping = self.mapping().await?;
        Ok(BlobStoreStats {
            mapped_pieces: mapping.len(),
        })
    }
}

#[async_trait]
impl DataStore for BlobStore {
    async fn open(&self) -> Result<()> {
        let mut open = self.open.lock().await;
        if *open {
            return Ok(());
        }
        self.client.acquire().await?;
        *open = true;
        info!("Blob store opened");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut open = self.open.lock().await;
        if !*open {
            return Ok(());
        }
        *open = false;
        self.client.release().await?;
        info!("Blob store closed");
        Ok(())
    }

    async fn put(
        &self,
        tenant: &str,
        record_id: &str,
        cid: &str,
        mut data: ByteStream,
        cancel: Option<&CancellationToken>,
    ) -> Result<u64> {
        ensure_active(cancel)?;
        let mapping = self.mapping().await?;
        let namespace = data_namespace(tenant, record_id)?;

        let mut buffer = BytesMut::new();
        while let Some(chunk) = data.next().await {
            ensure_active(cancel)?;
            buffer.extend_from_slice(&chunk?);
        }
        ensure_active(cancel)?;
        let size = buffer.len() as u64;

        let receipt = self.client.upload(buffer.freeze()).await?;
        mapping.save(&namespace, cid, &receipt.piece_id)?;

        debug!(
            tenant = %tenant,
            record_id = %record_id,
            cid = %cid,
            piece_id = %receipt.piece_id,
            size = size,
            "Stored data"
        );
        Ok(size)
    }

    async fn get(
        &self,
        tenant: &str,
        record_id: &str,
        cid: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<DataGetResult>> {
        ensure_active(cancel)?;
        let mapping = self.mapping().await?;

        let Some(piece_id) = mapping.get(&data_namespace(tenant, record_id)?, cid)? else {
            return Ok(None);
        };
        ensure_active(cancel)?;

        match self.client.download(&piece_id).await {
            Ok(bytes) => Ok(Some(DataGetResult {
                data_size: bytes.len() as u64,
                data_stream: single_chunk_stream(bytes),
            })),
            Err(e) => {
                warn!(
                    tenant = %tenant,
                    record_id = %record_id,
                    cid = %cid,
                    piece_id = %piece_id,
                    error = %e,
                    "Data download failed"
                );
                Ok(None)
            }
        }
    }

    async fn delete(&self, tenant: &str, record_id: &str, cid: &str) -> Result<()> {
        let mapping = self.mapping().await?;
        mapping.delete(&data_namespace(tenant, record_id)?, cid)
    }

    async fn clear(&self) -> Result<()> {
        let mapping = self.mapping().await?;
        mapping.clear()?;
        info!("Cleared blob store mappings");
        Ok(())
    }
}
