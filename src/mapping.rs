//! CID -> piece identifier mappings
//!
//! The only durable record of where data actually lives on the remote
//! network. Stored in sled, one tree per purpose (`messages`, `data`), keys
//! scoped by namespace so tenants never share an entry.
//!
//! ```text
//! PIECES/
//! └── (sled)
//!     ├── messages   {tenant}\0{cid}             -> piece id
//!     └── data       {tenant}\0{record}\0{cid}   -> piece id
//! ```

use crate::error::{Result, StorageError};
use crate::network::PieceId;
use sled::Db;
use std::path::Path;
use tracing::{debug, info};

/// Partition used by the record store
pub const MESSAGES_PARTITION: &str = "messages";

/// Partition used by the blob store
pub const DATA_PARTITION: &str = "data";

const SEPARATOR: u8 = 0;

/// Mapping database holding every partition
pub struct MappingDb {
    db: Db,
}

impl MappingDb {
    /// Open or create the mapping database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened piece mapping database");
        Ok(Self { db })
    }

    /// Open a named partition
    pub fn partition(&self, name: &str) -> Result<MappingStore> {
        let tree = self.db.open_tree(name)?;
        Ok(MappingStore { tree })
    }

    /// Flush changes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

/// One partition of the mapping database
#[derive(Clone)]
pub struct MappingStore {
    tree: sled::Tree,
}

/// Reject a key component containing the separator byte
pub fn check_key_part(kind: &str, value: &str) -> Result<()> {
    if value.as_bytes().contains(&SEPARATOR) {
        return Err(StorageError::InvalidKey(format!("{} contains a NUL byte", kind)));
    }
    Ok(())
}

/// `{namespace}\0{cid}`; the CID never holds the separator, so the last one
/// splits the key unambiguously
fn mapping_key(namespace: &str, cid: &str) -> Result<Vec<u8>> {
    check_key_part("cid", cid)?;
    let mut key = Vec::with_capacity(namespace.len() + cid.len() + 1);
    key.extend_from_slice(namespace.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(cid.as_bytes());
    Ok(key)
}

impl MappingStore {
    /// Persist `cid -> piece_id`, replacing any previous mapping
    pub fn save(&self, namespace: &str, cid: &str, piece_id: &PieceId) -> Result<()> {
        self.tree
            .insert(mapping_key(namespace, cid)?, piece_id.as_str().as_bytes())?;
        debug!(namespace = %namespace, cid = %cid, piece_id = %piece_id, "Saved piece mapping");
        Ok(())
    }

    /// Look up the piece for `cid`; `None` when no mapping exists
    pub fn get(&self, namespace: &str, cid: &str) -> Result<Option<PieceId>> {
        Ok(self
            .tree
            .get(mapping_key(namespace, cid)?)?
            .map(|v| PieceId::new(String::from_utf8_lossy(&v).into_owned())))
    }

    /// Remove the mapping if present
    pub fn delete(&self, namespace: &str, cid: &str) -> Result<()> {
        self.tree.remove(mapping_key(namespace, cid)?)?;
        Ok(())
    }

    /// Empty the whole partition
    pub fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        Ok(())
    }

    /// Entries in the partition
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Entries under one namespace
    pub fn count_namespace(&self, namespace: &str) -> usize {
        let mut prefix = namespace.as_bytes().to_vec();
        prefix.push(SEPARATOR);
        self.tree.scan_prefix(prefix).count()
    }

    pub async fn flush(&self) -> Result<()> {
        self.tree.flush_async().await?;
        Ok(())
    }
}
