//! Storage backend interfaces the host node depends on
//!
//! The host registers implementations of [`MessageStore`] and [`DataStore`]
//! and never sees the concrete stores behind them. [`StoreBackends`] builds
//! both from the environment around one shared [`RemoteBlobClient`].

use crate::blob_store::BlobStore;
use crate::error::Result;
use crate::index::{Cursor, Filter, IndexedProperties, Pagination, SortSpec};
use crate::record_store::RecordStore;
use crate::remote::RemoteBlobClient;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Chunked byte stream in or out of a [`DataStore`]
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A record together with its CID
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<R> {
    pub cid: String,
    pub record: R,
}

/// One page of records
#[derive(Debug, Clone)]
pub struct QueryResult<R> {
    pub records: Vec<StoredRecord<R>>,
    /// Pass back in [`Pagination::cursor`] to fetch the next page
    pub cursor: Option<Cursor>,
}

impl<R> Default for QueryResult<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            cursor: None,
        }
    }
}

/// Payload returned by [`DataStore::get`]
pub struct DataGetResult {
    pub data_size: u64,
    pub data_stream: ByteStream,
}

/// Structured, queryable record storage
#[async_trait]
pub trait MessageStore<R>: Send + Sync
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Persist a record and index it; returns its CID
    async fn put(
        &self,
        tenant: &str,
        record: &R,
        indexes: IndexedProperties,
        cancel: Option<&CancellationToken>,
    ) -> Result<String>;

    /// `None` when the record is unknown or unreadable
    async fn get(&self, tenant: &str, cid: &str, cancel: Option<&CancellationToken>) -> Result<Option<R>>;

    async fn query(
        &self,
        tenant: &str,
        filters: &[Filter],
        sort: Option<&SortSpec>,
        pagination: &Pagination,
        cancel: Option<&CancellationToken>,
    ) -> Result<QueryResult<R>>;

    async fn delete(&self, tenant: &str, cid: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Unindexed byte storage keyed by record and CID
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Store the stream's bytes; returns the total size
    async fn put(
        &self,
        tenant: &str,
        record_id: &str,
        cid: &str,
        data: ByteStream,
        cancel: Option<&CancellationToken>,
    ) -> Result<u64>;

    /// `None` when the data is unknown or unreadable
    async fn get(
        &self,
        tenant: &str,
        record_id: &str,
        cid: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<DataGetResult>>;

    async fn delete(&self, tenant: &str, record_id: &str, cid: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Both backends, sharing one remote client
pub struct StoreBackends<R = serde_json::Value>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub message_store: Arc<dyn MessageStore<R>>,
    pub data_store: Arc<dyn DataStore>,
}

impl<R> StoreBackends<R>
where
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Wire both stores to `client`
    pub fn with_client(client: Arc<RemoteBlobClient>) -> Self {
        Self {
            message_store: Arc::new(RecordStore::<R>::new(Arc::clone(&client))),
            data_store: Arc::new(BlobStore::new(client)),
        }
    }

    /// Resolve configuration from the environment; no arguments needed
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_client(Arc::new(RemoteBlobClient::from_env()?)))
    }
}
