//! Remote blob client
//!
//! Owns the session with the remote blob network and the local piece mapping
//! database. One client is shared by every store that persists through it:
//!
//! ```text
//!   RecordStore ──┐
//!                 ├── Arc<RemoteBlobClient> ── BlobNetwork (remote)
//!   BlobStore ────┘           │
//!                             └── MappingDb (PIECES/)
//! ```
//!
//! The session is reference counted: the first [`RemoteBlobClient::acquire`]
//! connects, the last [`RemoteBlobClient::release`] closes. Initialization is
//! serialized by a mutex, so concurrent first callers connect once.

use crate::cipher::{BlobCipher, PassthroughCipher};
use crate::config::Config;
use crate::error::{Result, StorageError};
use crate::mapping::{MappingDb, MappingStore};
use crate::network::{BlobNetwork, HttpConnector, NetworkConnector, PieceId, UploadReceipt};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Session {
    network: Arc<dyn BlobNetwork>,
    mapping: Arc<MappingDb>,
}

#[derive(Default)]
struct ClientState {
    session: Option<Session>,
    holders: usize,
}

pub struct RemoteBlobClient {
    config: Config,
    connector: Arc<dyn NetworkConnector>,
    cipher: Arc<dyn BlobCipher>,
    state: Mutex<ClientState>,
}

impl RemoteBlobClient {
    /// Client for the HTTP network endpoint in `config`, no encryption
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connector: Arc::new(HttpConnector),
            cipher: Arc::new(PassthroughCipher),
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Client configured from the process environment
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::from_env()?))
    }

    /// Replace the network transport
    pub fn with_connector(mut self, connector: Arc<dyn NetworkConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replace the encrypt/decrypt strategy
    pub fn with_cipher(mut self, cipher: Arc<dyn BlobCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect to the network and open the mapping database.
    ///
    /// Idempotent. A missing credential fails immediately with
    /// [`StorageError::Config`].
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state).await
    }

    async fn ensure_session(&self, state: &mut ClientState) -> Result<()> {
        if state.session.is_some() {
            return Ok(());
        }

        let api_key = self.config.require_api_key()?;

        tokio::fs::create_dir_all(&self.config.storage_dir).await?;
        let network = self.connector.connect(&self.config, api_key).await?;
        let mapping = MappingDb::open(self.config.mapping_db_path())?;

        info!(
            rpc_url = %self.config.rpc_url,
            cipher = self.cipher.name(),
            "Remote blob client initialized"
        );

        state.session = Some(Session {
            network,
            mapping: Arc::new(mapping),
        });
        Ok(())
    }

    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    /// Register a dependent store, initializing on first use
    pub async fn acquire(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state).await?;
        state.holders += 1;
        debug!(holders = state.holders, "Remote blob client acquired");
        Ok(())
    }

    /// Drop a dependent store; the last release closes the session
    pub async fn release(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.holders == 0 {
            warn!("Remote blob client released more times than acquired");
            return Ok(());
        }
        state.holders -= 1;
        debug!(holders = state.holders, "Remote blob client released");
        if state.holders == 0 {
            Self::close_session(&mut state).await?;
        }
        Ok(())
    }

    /// Release the mapping database and reset to uninitialized.
    ///
    /// The remote network needs no teardown.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.holders = 0;
        Self::close_session(&mut state).await
    }

    async fn close_session(state: &mut ClientState) -> Result<()> {
        if let Some(session) = state.session.take() {
            session.mapping.flush().await?;
            info!("Remote blob client closed");
        }
        Ok(())
    }

    async fn network(&self) -> Result<Arc<dyn BlobNetwork>> {
        let state = self.state.lock().await;
        state
            .session
            .as_ref()
            .map(|s| Arc::clone(&s.network))
            .ok_or(StorageError::NotOpen("remote blob client"))
    }

    /// Open a partition of the mapping database
    pub async fn mapping(&self, partition: &str) -> Result<MappingStore> {
        let state = self.state.lock().await;
        let session = state
            .session
            .as_ref()
            .ok_or(StorageError::NotOpen("remote blob client"))?;
        session.mapping.partition(partition)
    }

    /// Encrypt and upload. Errors are returned unchanged, never retried.
    pub async fn upload(&self, data: Bytes) -> Result<UploadReceipt> {
        let network = self.network().await?;
        let sealed = self.cipher.encrypt(data)?;
        network.upload(sealed).await
    }

    /// Download and decrypt
    pub async fn download(&self, piece_id: &PieceId) -> Result<Bytes> {
        let network = self.network().await?;
        let sealed = network.download(piece_id).await?;
        self.cipher.decrypt(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{MemoryBlobNetwork, MemoryConnector};
    use tempfile::TempDir;

    /// Flips every byte; symmetric by construction
    struct InvertCipher;

    impl BlobCipher for InvertCipher {
        fn encrypt(&self, plaintext: Bytes) -> Result<Bytes> {
            Ok(plaintext.iter().map(|b| !b).collect::<Vec<u8>>().into())
        }

        fn decrypt(&self, ciphertext: Bytes) -> Result<Bytes> {
            self.encrypt(ciphertext)
        }
    }

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            api_key: Some("test-key".to_string()),
            storage_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    fn memory_client(temp_dir: &TempDir) -> (RemoteBlobClient, Arc<MemoryConnector>) {
        let connector = Arc::new(MemoryConnector::new(Arc::new(MemoryBlobNetwork::new())));
        let client = RemoteBlobClient::new(test_config(temp_dir)).with_connector(connector.clone());
        (client, connector)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let (client, connector) = memory_client(&temp_dir);

        client.initialize().await.unwrap();
        client.initialize().await.unwrap();

        assert!(client.is_ready().await);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_connects_once() {
        let temp_dir = TempDir::new().unwrap();
        let (client, connector) = memory_client(&temp_dir);
        let client = Arc::new(client);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.initialize().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let connector = Arc::new(MemoryConnector::default());
        let config = Config {
            api_key: None,
            storage_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        let client = RemoteBlobClient::new(config).with_connector(connector.clone());

        assert!(matches!(client.initialize().await, Err(StorageError::Config(_))));
        assert_eq!(connector.connect_count(), 0);
        assert!(!client.is_ready().await);
    }

    #[tokio::test]
    async fn test_operations_before_initialize() {
        let temp_dir = TempDir::new().unwrap();
        let (client, _) = memory_client(&temp_dir);

        assert!(matches!(
            client.upload(Bytes::from_static(b"x")).await,
            Err(StorageError::NotOpen(_))
        ));
        assert!(matches!(client.mapping("messages").await, Err(StorageError::NotOpen(_))));
    }

    #[tokio::test]
    async fn test_cipher_applied_on_both_paths() {
        let temp_dir = TempDir::new().unwrap();
        let network = Arc::new(MemoryBlobNetwork::new());
        let client = RemoteBlobClient::new(test_config(&temp_dir))
            .with_connector(Arc::new(MemoryConnector::new(network.clone())))
            .with_cipher(Arc::new(InvertCipher));
        client.initialize().await.unwrap();

        let receipt = client.upload(Bytes::from_static(b"secret")).await.unwrap();
        let raw = network.raw_piece(&receipt.piece_id).await.unwrap();
        assert_ne!(&raw[..], b"secret");

        let roundtrip = client.download(&receipt.piece_id).await.unwrap();
        assert_eq!(&roundtrip[..], b"secret");
    }

    #[tokio::test]
    async fn test_reference_counted_session() {
        let temp_dir = TempDir::new().unwrap();
        let (client, connector) = memory_client(&temp_dir);

        client.acquire().await.unwrap();
        client.acquire().await.unwrap();
        assert_eq!(connector.connect_count(), 1);

        client.release().await.unwrap();
        assert!(client.is_ready().await);

        client.release().await.unwrap();
        assert!(!client.is_ready().await);

        // extra release is harmless
        client.release().await.unwrap();

        // reopen after full release
        client.acquire().await.unwrap();
        assert!(client.is_ready().await);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_close_resets() {
        let temp_dir = TempDir::new().unwrap();
        let (client, connector) = memory_client(&temp_dir);

        client.initialize().await.unwrap();
        client.close().await.unwrap();
        assert!(!client.is_ready().await);

        client.initialize().await.unwrap();
        assert_eq!(connector.connect_count(), 2);
    }
}
