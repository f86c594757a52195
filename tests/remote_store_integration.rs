//! Integration tests for the record and blob stores
//!
//! Both stores run against an in-process blob network and real sled
//! databases in a temporary directory.

use bytes::Bytes;
use elohim_remote_store::network::MemoryConnector;
use elohim_remote_store::{
    Config, DataStore, Filter, FilterValue, IndexValue, IndexedProperties, MemoryBlobNetwork, MessageStore,
    Pagination, RemoteBlobClient, SortSpec, StoreBackends,
};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const TENANT: &str = "did:abc";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Message {
    kind: String,
    timestamp: i64,
}

struct Harness {
    client: Arc<RemoteBlobClient>,
    connector: Arc<MemoryConnector>,
    network: Arc<MemoryBlobNetwork>,
    _temp: TempDir,
}

fn harness_at(temp: TempDir, network: Arc<MemoryBlobNetwork>) -> Harness {
    let config = Config {
        api_key: Some("integration-key".to_string()),
        storage_dir: temp.path().to_path_buf(),
        ..Default::default()
    };
    let connector = Arc::new(MemoryConnector::new(network.clone()));
    let client = Arc::new(RemoteBlobClient::new(config).with_connector(connector.clone()));
    Harness {
        client,
        connector,
        network,
        _temp: temp,
    }
}

fn harness() -> Harness {
    harness_at(TempDir::new().unwrap(), Arc::new(MemoryBlobNetwork::new()))
}

fn indexes(timestamp: i64, kind: &str) -> IndexedProperties {
    [
        ("timestamp".to_string(), IndexValue::from(timestamp)),
        ("kind".to_string(), IndexValue::from(kind)),
    ]
    .into()
}

async fn put_message<S: MessageStore<Message> + ?Sized>(store: &S, tenant: &str, timestamp: i64) -> String {
    let message = Message {
        kind: "note".to_string(),
        timestamp,
    };
    store
        .put(tenant, &message, indexes(timestamp, "note"), None)
        .await
        .unwrap()
}

/// Scenario: sort keys 1,2,3; limit 2 gives [1,2] and a cursor, the cursor gives [3]
#[tokio::test]
async fn test_cursor_pagination_scenario() {
    let h = harness();
    let backends = StoreBackends::<Message>::with_client(h.client.clone());
    let store = backends.message_store;
    store.open().await.unwrap();

    for ts in 1..=3 {
        put_message(store.as_ref(), TENANT, ts).await;
    }

    let sort = SortSpec::ascending("timestamp");
    let first = store
        .query(TENANT, &[], Some(&sort), &Pagination::limit(2), None)
        .await
        .unwrap();
    let stamps: Vec<i64> = first.records.iter().map(|r| r.record.timestamp).collect();
    assert_eq!(stamps, vec![1, 2]);
    let cursor = first.cursor.expect("cursor for remaining page");

    let second = store
        .query(TENANT, &[], Some(&sort), &Pagination::limit(2).after(cursor), None)
        .await
        .unwrap();
    let stamps: Vec<i64> = second.records.iter().map(|r| r.record.timestamp).collect();
    assert_eq!(stamps, vec![3]);
    assert!(second.cursor.is_none());

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_pagination_covers_every_record_once() {
    let h = harness();
    let store = StoreBackends::<Message>::with_client(h.client.clone()).message_store;
    store.open().await.unwrap();

    const N: i64 = 10;
    // insert out of order; sort keys still define the order
    for ts in [7, 3, 10, 1, 5, 2, 9, 4, 8, 6] {
        put_message(store.as_ref(), TENANT, ts).await;
    }

    let sort = SortSpec::ascending("timestamp");
    let first = store
        .query(TENANT, &[], Some(&sort), &Pagination::limit(4), None)
        .await
        .unwrap();
    let mut seen: Vec<i64> = first.records.iter().map(|r| r.record.timestamp).collect();
    assert_eq!(seen, vec![1, 2, 3, 4]);

    let rest = store
        .query(
            TENANT,
            &[],
            Some(&sort),
            &Pagination {
                limit: None,
                cursor: first.cursor,
            },
            None,
        )
        .await
        .unwrap();
    seen.extend(rest.records.iter().map(|r| r.record.timestamp));

    assert_eq!(seen, (1..=N).collect::<Vec<_>>());
    assert!(rest.cursor.is_none());
}

#[tokio::test]
async fn test_tenant_isolation() {
    let h = harness();
    let store = StoreBackends::<Message>::with_client(h.client.clone()).message_store;
    store.open().await.unwrap();

    let cid = put_message(store.as_ref(), "did:abc", 1).await;
    put_message(store.as_ref(), "did:xyz", 2).await;

    let result = store
        .query("did:abc", &[], None, &Pagination::default(), None)
        .await
        .unwrap();
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].cid, cid);

    // a CID known to one tenant is not readable through another
    assert!(store.get("did:xyz", &cid, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_filtered_query() {
    let h = harness();
    let store = StoreBackends::<serde_json::Value>::with_client(h.client.clone()).message_store;
    store.open().await.unwrap();

    for (ts, kind) in [(1, "note"), (2, "photo"), (3, "note")] {
        store
            .put(TENANT, &json!({ "ts": ts, "kind": kind }), indexes(ts, kind), None)
            .await
            .unwrap();
    }

    let filter: Filter = [("kind".to_string(), FilterValue::Equal("note".into()))].into();
    let result = store
        .query(
            TENANT,
            &[filter],
            Some(&SortSpec::descending("timestamp")),
            &Pagination::default(),
            None,
        )
        .await
        .unwrap();

    let stamps: Vec<i64> = result
        .records
        .iter()
        .map(|r| r.record["ts"].as_i64().unwrap())
        .collect();
    assert_eq!(stamps, vec![3, 1]);
}

#[tokio::test]
async fn test_identical_content_is_uploaded_twice() {
    let h = harness();
    let store = StoreBackends::<Message>::with_client(h.client.clone()).message_store;
    store.open().await.unwrap();

    let a = put_message(store.as_ref(), TENANT, 1).await;
    let b = put_message(store.as_ref(), TENANT, 1).await;

    assert_eq!(a, b);
    assert_eq!(h.network.upload_count(), 2);

    let result = store
        .query(TENANT, &[], None, &Pagination::default(), None)
        .await
        .unwrap();
    assert_eq!(result.records.len(), 1);
}

#[tokio::test]
async fn test_shared_client_connects_once_and_closes_with_last_store() {
    let h = harness();
    let backends = StoreBackends::<Message>::with_client(h.client.clone());

    backends.message_store.open().await.unwrap();
    backends.data_store.open().await.unwrap();
    assert_eq!(h.connector.connect_count(), 1);

    backends.message_store.close().await.unwrap();
    assert!(h.client.is_ready().await);

    backends.data_store.close().await.unwrap();
    assert!(!h.client.is_ready().await);
}

#[tokio::test]
async fn test_records_survive_restart() {
    let network = Arc::new(MemoryBlobNetwork::new());
    let temp = TempDir::new().unwrap();
    let path = temp.path().to_path_buf();

    let h = harness_at(temp, network.clone());
    let store = StoreBackends::<Message>::with_client(h.client.clone()).message_store;
    store.open().await.unwrap();
    let cid = put_message(store.as_ref(), TENANT, 42).await;
    store.close().await.unwrap();
    drop(store);

    // fresh client and stores over the same directory and network
    let config = Config {
        api_key: Some("integration-key".to_string()),
        storage_dir: path,
        ..Default::default()
    };
    let client = Arc::new(
        RemoteBlobClient::new(config).with_connector(Arc::new(MemoryConnector::new(network))),
    );
    let store = StoreBackends::<Message>::with_client(client).message_store;
    store.open().await.unwrap();

    let message = store.get(TENANT, &cid, None).await.unwrap().unwrap();
    assert_eq!(message.timestamp, 42);

    let result = store
        .query(TENANT, &[], None, &Pagination::default(), None)
        .await
        .unwrap();
    assert_eq!(result.records.len(), 1);
}

#[tokio::test]
async fn test_delete_only_prunes_index() {
    let h = harness();
    let store = StoreBackends::<Message>::with_client(h.client.clone()).message_store;
    store.open().await.unwrap();

    let cid = put_message(store.as_ref(), TENANT, 1).await;
    store.delete(TENANT, &cid).await.unwrap();

    let result = store
        .query(TENANT, &[], None, &Pagination::default(), None)
        .await
        .unwrap();
    assert!(result.records.is_empty());

    // mapping was left in place, so the immutable piece is still reachable
    let message = store.get(TENANT, &cid, None).await.unwrap();
    assert_eq!(message.map(|m| m.timestamp), Some(1));
    assert_eq!(h.network.piece_count().await, 1);
}

#[tokio::test]
async fn test_clear_empties_index() {
    let h = harness();
    let store = StoreBackends::<Message>::with_client(h.client.clone()).message_store;
    store.open().await.unwrap();

    put_message(store.as_ref(), TENANT, 1).await;
    put_message(store.as_ref(), "did:xyz", 2).await;
    store.clear().await.unwrap();

    for tenant in [TENANT, "did:xyz"] {
        let result = store
            .query(tenant, &[], None, &Pagination::default(), None)
            .await
            .unwrap();
        assert!(result.records.is_empty());
    }
}

#[tokio::test]
async fn test_blob_store_stream_roundtrip() {
    let h = harness();
    let data_store = StoreBackends::<Message>::with_client(h.client.clone()).data_store;
    data_store.open().await.unwrap();

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let chunks: Vec<std::io::Result<Bytes>> = payload
        .chunks(4096)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let cid = elohim_remote_store::content_id::compute_raw(&payload);

    let size = data_store
        .put(TENANT, "record-1", &cid, stream::iter(chunks).boxed(), None)
        .await
        .unwrap();
    assert_eq!(size, payload.len() as u64);

    let mut result = data_store.get(TENANT, "record-1", &cid, None).await.unwrap().unwrap();
    assert_eq!(result.data_size, payload.len() as u64);

    let mut received = Vec::new();
    let mut chunk_count = 0;
    while let Some(chunk) = result.data_stream.next().await {
        received.extend_from_slice(&chunk.unwrap());
        chunk_count += 1;
    }
    assert_eq!(chunk_count, 1);
    assert_eq!(received, payload);
}
