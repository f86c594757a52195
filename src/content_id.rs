//! Content identifiers
//!
//! CIDv1 over a sha2-256 multihash. Records are hashed over their canonical
//! JSON encoding and tagged `dag-json`; data streams are tagged `raw`.
//! Identical bytes always yield the same CID.

use crate::error::{Result, StorageError};
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use std::str::FromStr;

/// Multicodec for raw bytes
pub const RAW_CODEC: u64 = 0x55;

/// Multicodec for canonical JSON records
pub const DAG_JSON_CODEC: u64 = 0x0129;

/// Multihash code for sha2-256
const SHA2_256: u64 = 0x12;

/// Compute the CID of `data` under the given multicodec
pub fn compute(codec: u64, data: &[u8]) -> String {
    let hash = Code::Sha2_256.digest(data);
    Cid::new_v1(codec, hash).to_string()
}

/// CID for an opaque byte payload
pub fn compute_raw(data: &[u8]) -> String {
    compute(RAW_CODEC, data)
}

/// CID for a canonically encoded record
pub fn compute_record(encoded: &[u8]) -> String {
    compute(DAG_JSON_CODEC, encoded)
}

/// Parse a CID string
pub fn parse(cid: &str) -> Result<Cid> {
    Cid::from_str(cid).map_err(|e| StorageError::InvalidCid(format!("{}: {}", cid, e)))
}

/// Check that `data` hashes to `cid`, using the codec the CID declares
pub fn verify(cid: &str, data: &[u8]) -> Result<bool> {
    let parsed = parse(cid)?;
    if parsed.hash().code() != SHA2_256 {
        return Err(StorageError::InvalidCid(format!(
            "{}: unsupported hash function 0x{:x}",
            cid,
            parsed.hash().code()
        )));
    }
    let expected = Cid::new_v1(parsed.codec(), Code::Sha2_256.digest(data));
    Ok(expected == parsed)
}
