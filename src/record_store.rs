//! Record store: structured, queryable records on the remote network
//!
//! Write path: encode → CID → upload → mapping → index. The mapping is saved
//! before the index entry, so an indexed record is always reachable; a failed
//! upload persists nothing.
//!
//! Read path: mapping → download → decode. Any failure after the mapping
//! lookup is logged and reported as not found.
//!
//! Deleting only prunes the index. The remote piece is immutable and its
//! mapping stays, so the bytes remain retrievable by CID.

use crate::backend::{MessageStore, QueryResult, StoredRecord};
use crate::codec::{decode_record, encode_record, ensure_active};
use crate::content_id;
use crate::error::{Result, StorageError};
use crate::index::{Filter, IndexStore, IndexedProperties, Pagination, SortSpec};
use crate::mapping::{check_key_part, MappingStore, MESSAGES_PARTITION};
use crate::remote::RemoteBlobClient;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Local counts, gathered without touching the network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStoreStats {
    pub indexed_records: usize,
    pub mapped_pieces: usize,
}

pub struct RecordStore<R = serde_json::Value> {
    client: Arc<RemoteBlobClient>,
    index_path: PathBuf,
    index: RwLock<Option<Arc<IndexStore>>>,
    _record: PhantomData<fn() -> R>,
}

impl<R> RecordStore<R>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Store persisting through `client`, index under the client's data dir
    pub fn new(client: Arc<RemoteBlobClient>) -> Self {
        let index_path = client.config().index_db_path();
        Self {
            client,
            index_path,
            index: RwLock::new(None),
            _record: PhantomData,
        }
    }

    /// Store with its own client configured from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Arc::new(RemoteBlobClient::from_env()?)))
    }

    /// Override the index location
    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = path.into();
        self
    }

    pub async fn is_open(&self) -> bool {
        self.index.read().await.is_some()
    }

    async fn index(&self) -> Result<Arc<IndexStore>> {
        self.index
            .read()
            .await
            .clone()
            .ok_or(StorageError::NotOpen("record store"))
    }

    async fn mapping(&self) -> Result<MappingStore> {
        self.client.mapping(MESSAGES_PARTITION).await
    }

    pub async fn stats(&self) -> Result<RecordStoreStats> {
        let index = self.index().await?;
        let mapping = self.mapping().await?;
        Ok(RecordStoreStats {
            indexed_records: index.len(),
            mapped_pieces: mapping.len(),
        })
    }

    async fn open_store(&self) -> Result<()> {
        let mut slot = self.index.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let index = IndexStore::open(&self.index_path).await?;
        self.client.acquire().await?;
        *slot = Some(Arc::new(index));

        info!(index = %self.index_path.display(), "Record store opened");
        Ok(())
    }

    async fn close_store(&self) -> Result<()> {
        let Some(index) = self.index.write().await.take() else {
            return Ok(());
        };
        index.flush().await?;
        self.client.release().await?;
        info!("Record store closed");
        Ok(())
    }

    async fn put_record(
        &self,
        tenant: &str,
        record: &R,
        indexes: IndexedProperties,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        ensure_active(cancel)?;
        check_key_part("tenant", tenant)?;
        let index = self.index().await?;
        let mapping = self.mapping().await?;

        let encoded = encode_record(record, cancel)?;
        let cid = content_id::compute_record(&encoded);

        let receipt = self.client.upload(encoded).await?;
        mapping.save(tenant, &cid, &receipt.piece_id)?;
        index.insert(tenant, &cid, indexes)?;

        debug!(
            tenant = %tenant,
            cid = %cid,
            piece_id = %receipt.piece_id,
            size = receipt.size,
            "Stored record"
        );
        Ok(cid)
    }

    async fn get_record(
        &self,
        tenant: &str,
        cid: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<R>> {
        ensure_active(cancel)?;
        self.index().await?;
        let mapping = self.mapping().await?;

        let Some(piece_id) = mapping.get(tenant, cid)? else {
            return Ok(None);
        };

        let bytes = match self.client.download(&piece_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(tenant = %tenant, cid = %cid, piece_id = %piece_id, error = %e, "Record download failed");
                return Ok(None);
            }
        };

        match content_id::verify(cid, &bytes) {
            Ok(true) => {}
            Ok(false) => {
                warn!(tenant = %tenant, cid = %cid, piece_id = %piece_id, "Downloaded record does not match its CID");
                return Ok(None);
            }
            Err(e) => {
                warn!(tenant = %tenant, cid = %cid, error = %e, "Cannot verify record CID");
                return Ok(None);
            }
        }

        match decode_record(&bytes, cancel) {
            Ok(record) => Ok(Some(record)),
            Err(StorageError::Cancelled) => Err(StorageError::Cancelled),
            Err(e) => {
                warn!(tenant = %tenant, cid = %cid, error = %e, "Record decode failed");
                Ok(None)
            }
        }
    }

    async fn query_records(
        &self,
        tenant: &str,
        filters: &[Filter],
        sort: Option<&SortSpec>,
        pagination: &Pagination,
        cancel: Option<&CancellationToken>,
    ) -> Result<QueryResult<R>> {
        ensure_active(cancel)?;
        let index = self.index().await?;
        let page = index.query(tenant, filters, sort, pagination)?;

        let mut records = Vec::with_capacity(page.entries.len());
        for entry in page.entries {
            if let Some(record) = self.get_record(tenant, &entry.cid, cancel).await? {
                records.push(StoredRecord {
                    cid: entry.cid,
                    record,
                });
            } else {
                debug!(tenant = %tenant, cid = %entry.cid, "Skipping unreadable record");
            }
        }

        Ok(QueryResult {
            records,
            cursor: page.cursor,
        })
    }

    async fn delete_record(&self, tenant: &str, cid: &str) -> Result<()> {
        let index = self.index().await?;
        index.delete(tenant, cid)?;
        Ok(())
    }

    async fn clear_records(&self) -> Result<()> {
        self.index().await?.clear()
    }
}

#[async_trait]
impl<R> MessageStore<R> for RecordStore<R>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn open(&self) -> Result<()> {
        self.open_store().await
    }

    async fn close(&self) -> Result<()> {
        self.close_store().await
    }

    async fn put(
        &self,
        tenant: &str,
        record: &R,
        indexes: IndexedProperties,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        self.put_record(tenant, record, indexes, cancel).await
    }

    async fn get(&self, tenant: &str, cid: &str, cancel: Option<&CancellationToken>) -> Result<Option<R>> {
        self.get_record(tenant, cid, cancel).await
    }

    async fn query(
        &self,
        tenant: &str,
        filters: &[Filter],
        sort: Option<&SortSpec>,
        pagination: &Pagination,
        cancel: Option<&CancellationToken>,
    ) -> Result<QueryResult<R>> {
        self.query_records(tenant, filters, sort, pagination, cancel).await
    }

    async fn delete(&self, tenant: &str, cid: &str) -> Result<()> {
        self.delete_record(tenant, cid).await
    }

    async fn clear(&self) -> Result<()> {
        self.clear_records().await
    }
}
