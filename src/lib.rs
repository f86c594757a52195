//! Elohim Remote Store - remote blob network backend for Elohim data nodes
//!
//! Persists a node's records and record data on a remote content-addressed
//! blob network instead of local disk, while keeping enough local state to
//! find and query them.
//!
//! ## Architecture
//!
//! - **RemoteBlobClient**: session with the remote network; upload/download
//!   of opaque bytes through a pluggable cipher
//! - **MappingStore**: local CID -> piece identifier mappings (sled)
//! - **IndexStore**: local per-tenant query index with cursor pagination (sled)
//! - **RecordStore**: structured records (index + mapping + network)
//! - **BlobStore**: unindexed data streams (mapping + network)
//!
//! ## Why keep local state?
//!
//! | Question | Answered by |
//! |----------|-------------|
//! | Where does CID X live on the network? | Mapping store |
//! | Which records match this filter, in order? | Index store |
//! | What are the bytes? | Remote network |
//!
//! The network is append-only: delete and clear prune local state and never
//! reach the network.
//!
//! ## Storage Layout
//!
//! ```text
//! $REMOTE_STORE_DATA_DIR/
//! ├── INDEX/     # Query index (sled)
//! └── PIECES/    # CID -> piece mappings, one tree per partition (sled)
//! ```

pub mod backend;
pub mod blob_store;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod content_id;
pub mod error;
pub mod index;
pub mod mapping;
pub mod network;
pub mod record_store;
pub mod remote;

// Re-exports
pub use backend::{ByteStream, DataGetResult, DataStore, MessageStore, QueryResult, StoreBackends, StoredRecord};
pub use blob_store::BlobStore;
pub use cipher::{BlobCipher, PassthroughCipher};
pub use config::Config;
pub use error::StorageError;
pub use index::{
    Cursor, Filter, FilterValue, IndexStore, IndexValue, IndexedProperties, Pagination, RangeFilter,
    SortDirection, SortSpec,
};
pub use mapping::{MappingDb, MappingStore};
pub use network::{BlobNetwork, HttpBlobNetwork, MemoryBlobNetwork, NetworkConnector, PieceId, UploadReceipt};
pub use record_store::RecordStore;
pub use remote::RemoteBlobClient;
pub use tokio_util::sync::CancellationToken;
