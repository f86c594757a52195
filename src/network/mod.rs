//! Remote blob network transport
//!
//! The network is a black box with two operations: upload bytes and receive a
//! piece identifier, or download the bytes behind a piece identifier. Pieces
//! are immutable; nothing here can delete them.
//!
//! - [`HttpBlobNetwork`] talks to the network's RPC endpoint
//! - [`MemoryBlobNetwork`] keeps pieces in process (tests, offline nodes)

mod http;
mod memory;

pub use http::{HttpBlobNetwork, HttpConnector};
pub use memory::{MemoryBlobNetwork, MemoryConnector};

use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier the remote network assigns to an uploaded piece.
///
/// Unrelated in format to a CID; the only handle for getting bytes back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(String);

impl PieceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub piece_id: PieceId,
    /// Size in bytes of the uploaded payload
    pub size: u64,
}

/// Upload/download of opaque bytes.
///
/// Failures are returned as-is; implementations do not retry.
#[async_trait]
pub trait BlobNetwork: Send + Sync {
    async fn upload(&self, data: Bytes) -> Result<UploadReceipt>;

    async fn download(&self, piece_id: &PieceId) -> Result<Bytes>;
}

/// Establishes a network session from configuration
#[async_trait]
pub trait NetworkConnector: Send + Sync {
    async fn connect(&self, config: &Config, api_key: &str) -> Result<Arc<dyn BlobNetwork>>;
}
