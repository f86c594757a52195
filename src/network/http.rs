//! HTTP transport for the remote blob network
//!
//! - `POST {rpc}/pieces` with an octet-stream body returns `{"pieceId", "size"}`
//! - `GET {rpc}/pieces/{pieceId}` returns the raw bytes
//!
//! Every request carries `Authorization: Bearer {api_key}`.

use super::{BlobNetwork, NetworkConnector, PieceId, UploadReceipt};
use crate::config::Config;
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    piece_id: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Client for the network's RPC endpoint
pub struct HttpBlobNetwork {
    http_client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl HttpBlobNetwork {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("elohim-remote-store/0.1")
            .build()
            .map_err(|e| StorageError::Config(format!("HTTP client: {}", e)))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| StorageError::Config(format!("RPC URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::Config(format!("RPC URL {} cannot take a path", base_url)));
        }

        Ok(Self {
            http_client,
            base_url,
            api_key: api_key.to_string(),
        })
    }

    /// `{rpc}/pieces`, or `{rpc}/pieces/{id}` with the id as one encoded segment
    fn pieces_url(&self, piece_id: Option<&PieceId>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Config(format!("RPC URL {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .push("pieces")
            .extend(piece_id.map(PieceId::as_str));
        Ok(url)
    }
}

#[async_trait]
impl BlobNetwork for HttpBlobNetwork {
    async fn upload(&self, data: Bytes) -> Result<UploadReceipt> {
        let len = data.len() as u64;
        let response = self
            .http_client
            .post(self.pieces_url(None)?)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Upload(format!("HTTP {}: {}", status, body)));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Upload(format!("Malformed upload response: {}", e)))?;

        debug!(piece_id = %parsed.piece_id, size = len, "Uploaded piece");

        Ok(UploadReceipt {
            piece_id: PieceId::new(parsed.piece_id),
            size: parsed.size.unwrap_or(len),
        })
    }

    async fn download(&self, piece_id: &PieceId) -> Result<Bytes> {
        let url = self.pieces_url(Some(piece_id))?;
        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StorageError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Download(format!("HTTP {} for piece {}", status, piece_id)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::Download(e.to_string()))?;

        debug!(piece_id = %piece_id, size = bytes.len(), "Downloaded piece");
        Ok(bytes)
    }
}

/// Connects an [`HttpBlobNetwork`] to `config.rpc_url`
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

#[async_trait]
impl NetworkConnector for HttpConnector {
    async fn connect(&self, config: &Config, api_key: &str) -> Result<Arc<dyn BlobNetwork>> {
        let network = HttpBlobNetwork::new(&config.rpc_url, api_key, config.request_timeout())?;
        Ok(Arc::new(network))
    }
}
