//! Canonical record encoding
//!
//! Records are serialized to JSON with object keys sorted at every level, so
//! equal records always encode to equal bytes and hence the same CID.
//! Cancellation is checked around each stage.

use crate::error::{Result, StorageError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Fail with [`StorageError::Cancelled`] if the token has fired
pub fn ensure_active(cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(StorageError::Cancelled),
        _ => Ok(()),
    }
}

/// Rebuild objects with keys inserted in sorted order, whatever map type
/// serde_json was built with
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Encode a record to its canonical bytes
pub fn encode_record<R: Serialize>(record: &R, cancel: Option<&CancellationToken>) -> Result<Bytes> {
    ensure_active(cancel)?;
    let value = canonicalize(serde_json::to_value(record)?);
    ensure_active(cancel)?;
    let bytes = serde_json::to_vec(&value)?;
    ensure_active(cancel)?;
    Ok(Bytes::from(bytes))
}

/// Decode canonical bytes back to a record
pub fn decode_record<R: DeserializeOwned>(bytes: &[u8], cancel: Option<&CancellationToken>) -> Result<R> {
    ensure_active(cancel)?;
    let value: Value = serde_json::from_slice(bytes)?;
    ensure_active(cancel)?;
    Ok(serde_json::from_value(value)?)
}
