//! In-process blob network
//!
//! Pieces live in a map for the lifetime of the value. Failure switches let
//! tests exercise the write-fails and read-degrades paths.

use super::{BlobNetwork, NetworkConnector, PieceId, UploadReceipt};
use crate::config::Config;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryBlobNetwork {
    pieces: RwLock<HashMap<PieceId, Bytes>>,
    next_piece: AtomicU64,
    uploads: AtomicU64,
    downloads: AtomicU64,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
}

impl MemoryBlobNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent uploads fail
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent downloads fail
    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }

    pub async fn piece_count(&self) -> usize {
        self.pieces.read().await.len()
    }

    /// Raw stored bytes, bypassing any cipher
    pub async fn raw_piece(&self, piece_id: &PieceId) -> Option<Bytes> {
        self.pieces.read().await.get(piece_id).cloned()
    }
}

#[async_trait]
impl BlobNetwork for MemoryBlobNetwork {
    async fn upload(&self, data: Bytes) -> Result<UploadReceipt> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Upload("network unavailable".to_string()));
        }

        let n = self.next_piece.fetch_add(1, Ordering::SeqCst);
        let piece_id = PieceId::new(format!("mem-piece-{:08}", n));
        let size = data.len() as u64;

        self.pieces.write().await.insert(piece_id.clone(), data);
        self.uploads.fetch_add(1, Ordering::SeqCst);

        Ok(UploadReceipt { piece_id, size })
    }

    async fn download(&self, piece_id: &PieceId) -> Result<Bytes> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(StorageError::Download("network unavailable".to_string()));
        }

        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.pieces
            .read()
            .await
            .get(piece_id)
            .cloned()
            .ok_or_else(|| StorageError::Download(format!("unknown piece {}", piece_id)))
    }
}

/// Hands out a shared [`MemoryBlobNetwork`] and counts connections
#[derive(Default)]
pub struct MemoryConnector {
    network: Arc<MemoryBlobNetwork>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(network: Arc<MemoryBlobNetwork>) -> Self {
        Self {
            network,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn network(&self) -> Arc<MemoryBlobNetwork> {
        Arc::clone(&self.network)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkConnector for MemoryConnector {
    async fn connect(&self, _config: &Config, _api_key: &str) -> Result<Arc<dyn BlobNetwork>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.network.clone())
    }
}
