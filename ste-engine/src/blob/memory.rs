//! In-memory blob client for tests.
//!
//! Keeps staged blocks and committed blobs in hash maps, records call
//! counts, and offers failure injection plus a gate that holds put-block
//! calls open, so cancellation behavior can be exercised deterministically.
//! The client is [`Clone`] so tests can hold a handle for direct inspection
//! while the engine owns a shared copy.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::{BlobClient, BlobError, BlobHeaders, BlobItem, BlobPage, BlobProperties};

/// A blob committed via `put_blob` or `put_block_list`.
#[derive(Debug, Clone)]
pub struct CommittedBlob {
    /// The full contents of the blob.
    pub data: Bytes,
    /// The committed block ids, or `None` for single-call blobs.
    pub block_ids: Option<Vec<String>>,
    /// The headers the blob was created with.
    pub headers: BlobHeaders,
    /// The metadata the blob was created with.
    pub metadata: BTreeMap<String, String>,
    /// Commit time of the blob.
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Store {
    containers: BTreeSet<String>,
    staged: HashMap<String, HashMap<String, Vec<u8>>>,
    committed: BTreeMap<String, CommittedBlob>,
}

#[derive(Debug, Default)]
struct Inner {
    store: Mutex<Store>,
    put_block_calls: AtomicUsize,
    put_blob_calls: AtomicUsize,
    put_block_list_calls: AtomicUsize,
    get_range_calls: AtomicUsize,
    fail_put_block_at: Mutex<Option<usize>>,
    fail_put_block_list: AtomicBool,
    gate_after: Mutex<Option<usize>>,
    gate_open: Notify,
}

/// A [`BlobClient`] backed by process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobClient(Arc<Inner>);

impl InMemoryBlobClient {
    /// Creates an empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a committed blob, for download scenarios.
    pub fn seed_blob(&self, blob_url: &str, data: &[u8], last_modified: DateTime<Utc>) {
        let mut store = self.0.store.lock().unwrap();
        store.committed.insert(
            blob_url.to_owned(),
            CommittedBlob {
                data: Bytes::copy_from_slice(data),
                block_ids: None,
                headers: BlobHeaders::default(),
                metadata: BTreeMap::new(),
                last_modified,
            },
        );
    }

    /// The committed blob at the given URL, if any.
    pub fn committed(&self, blob_url: &str) -> Option<CommittedBlob> {
        self.0.store.lock().unwrap().committed.get(blob_url).cloned()
    }

    /// The number of blocks currently staged but not committed for a blob.
    pub fn staged_block_count(&self, blob_url: &str) -> usize {
        let store = self.0.store.lock().unwrap();
        store.staged.get(blob_url).map(|blocks| blocks.len()).unwrap_or(0)
    }

    /// Total `put_block` calls.
    pub fn put_block_calls(&self) -> usize {
        self.0.put_block_calls.load(Ordering::SeqCst)
    }

    /// Total `put_blob` calls.
    pub fn put_blob_calls(&self) -> usize {
        self.0.put_blob_calls.load(Ordering::SeqCst)
    }

    /// Total `put_block_list` calls.
    pub fn put_block_list_calls(&self) -> usize {
        self.0.put_block_list_calls.load(Ordering::SeqCst)
    }

    /// Total `get_range` calls.
    pub fn get_range_calls(&self) -> usize {
        self.0.get_range_calls.load(Ordering::SeqCst)
    }

    /// Makes the n-th `put_block` call (1-based, across all blobs) fail.
    pub fn fail_put_block_at(&self, ordinal: usize) {
        *self.0.fail_put_block_at.lock().unwrap() = Some(ordinal);
    }

    /// Makes every subsequent `put_block_list` call fail.
    pub fn fail_put_block_list(&self) {
        self.0.fail_put_block_list.store(true, Ordering::SeqCst);
    }

    /// Holds every `put_block` call beyond the first `ordinal` ones until
    /// [`release_put_blocks`](Self::release_put_blocks) is called.
    pub fn hold_put_blocks_after(&self, ordinal: usize) {
        *self.0.gate_after.lock().unwrap() = Some(ordinal);
    }

    /// Releases calls held by [`hold_put_blocks_after`](Self::hold_put_blocks_after).
    pub fn release_put_blocks(&self) {
        *self.0.gate_after.lock().unwrap() = None;
        self.0.gate_open.notify_waiters();
    }

    async fn gate(&self, ordinal: usize) {
        loop {
            let notified = self.0.gate_open.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let held = matches!(*self.0.gate_after.lock().unwrap(), Some(n) if ordinal > n);
            if !held {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait::async_trait]
impl BlobClient for InMemoryBlobClient {
    async fn put_block(
        &self,
        blob_url: &str,
        block_id: &str,
        body: &[u8],
    ) -> Result<(), BlobError> {
        let ordinal = self.0.put_block_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate(ordinal).await;

        if *self.0.fail_put_block_at.lock().unwrap() == Some(ordinal) {
            return Err(BlobError::Fatal("injected put_block failure".into()));
        }

        let mut store = self.0.store.lock().unwrap();
        store
            .staged
            .entry(blob_url.to_owned())
            .or_default()
            .insert(block_id.to_owned(), body.to_vec());
        Ok(())
    }

    async fn put_block_list(
        &self,
        blob_url: &str,
        block_ids: &[String],
        headers: &BlobHeaders,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), BlobError> {
        self.0.put_block_list_calls.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_put_block_list.load(Ordering::SeqCst) {
            return Err(BlobError::Fatal("injected put_block_list failure".into()));
        }

        let mut store = self.0.store.lock().unwrap();
        let staged = store.staged.remove(blob_url).unwrap_or_default();
        let mut data = Vec::new();
        for block_id in block_ids {
            let block = staged
                .get(block_id)
                .ok_or_else(|| BlobError::Fatal(format!("block {block_id} was never staged")))?;
            data.extend_from_slice(block);
        }
        store.committed.insert(
            blob_url.to_owned(),
            CommittedBlob {
                data: data.into(),
                block_ids: Some(block_ids.to_vec()),
                headers: headers.clone(),
                metadata: metadata.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn put_blob(
        &self,
        blob_url: &str,
        body: &[u8],
        headers: &BlobHeaders,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), BlobError> {
        self.0.put_blob_calls.fetch_add(1, Ordering::SeqCst);

        let mut store = self.0.store.lock().unwrap();
        store.committed.insert(
            blob_url.to_owned(),
            CommittedBlob {
                data: Bytes::copy_from_slice(body),
                block_ids: None,
                headers: headers.clone(),
                metadata: metadata.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_properties(&self, blob_url: &str) -> Result<BlobProperties, BlobError> {
        let store = self.0.store.lock().unwrap();
        let blob = store.committed.get(blob_url).ok_or(BlobError::NotFound)?;
        Ok(BlobProperties {
            content_length: blob.data.len() as u64,
            last_modified: blob.last_modified,
        })
    }

    async fn get_range(
        &self,
        blob_url: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, BlobError> {
        self.0.get_range_calls.fetch_add(1, Ordering::SeqCst);

        let store = self.0.store.lock().unwrap();
        let blob = store.committed.get(blob_url).ok_or(BlobError::NotFound)?;
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= blob.data.len() as u64)
            .ok_or_else(|| BlobError::Fatal("range out of bounds".into()))?;
        Ok(blob.data.slice(offset as usize..end as usize))
    }

    async fn list_blobs(
        &self,
        container_url: &str,
        prefix: &str,
        _marker: Option<&str>,
    ) -> Result<BlobPage, BlobError> {
        let full_prefix = format!("{}/{}", container_url.trim_end_matches('/'), prefix);
        let store = self.0.store.lock().unwrap();
        let items = store
            .committed
            .iter()
            .filter(|(url, _)| url.starts_with(&full_prefix))
            .map(|(url, blob)| BlobItem {
                name: url.clone(),
                properties: BlobProperties {
                    content_length: blob.data.len() as u64,
                    last_modified: blob.last_modified,
                },
            })
            .collect();
        Ok(BlobPage {
            items,
            next_marker: None,
        })
    }

    async fn create_container(&self, container_url: &str) -> Result<(), BlobError> {
        let mut store = self.0.store.lock().unwrap();
        store.containers.insert(container_url.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stage_and_commit() {
        let client = InMemoryBlobClient::new();
        let url = "https://acct.blob.example.net/c/a.bin";

        client.put_block(url, "id-b", b"world").await.unwrap();
        client.put_block(url, "id-a", b"hello ").await.unwrap();
        assert_eq!(client.staged_block_count(url), 2);
        assert!(matches!(client.get_properties(url).await, Err(BlobError::NotFound)));

        let ids = vec!["id-a".to_owned(), "id-b".to_owned()];
        client
            .put_block_list(url, &ids, &BlobHeaders::default(), &BTreeMap::new())
            .await
            .unwrap();

        let blob = client.committed(url).unwrap();
        assert_eq!(blob.data.as_ref(), b"hello world");
        assert_eq!(blob.block_ids.as_deref(), Some(&ids[..]));
        assert_eq!(client.staged_block_count(url), 0);
    }

    #[tokio::test]
    async fn ranges_are_served_from_committed_blobs() {
        let client = InMemoryBlobClient::new();
        let url = "https://acct.blob.example.net/c/a.bin";
        client.seed_blob(url, b"0123456789", Utc::now());

        let bytes = client.get_range(url, 2, 5).await.unwrap();
        assert_eq!(bytes.as_ref(), b"23456");
        assert!(client.get_range(url, 8, 5).await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_fire_by_ordinal() {
        let client = InMemoryBlobClient::new();
        let url = "https://acct.blob.example.net/c/a.bin";
        client.fail_put_block_at(2);

        client.put_block(url, "a", b"x").await.unwrap();
        assert!(client.put_block(url, "b", b"y").await.is_err());
        client.put_block(url, "c", b"z").await.unwrap();
        assert_eq!(client.put_block_calls(), 3);
    }

    #[tokio::test]
    async fn gate_holds_and_releases() {
        let client = InMemoryBlobClient::new();
        let url = "https://acct.blob.example.net/c/a.bin";
        client.hold_put_blocks_after(1);

        client.put_block(url, "a", b"x").await.unwrap();

        let held = tokio::spawn({
            let client = client.clone();
            async move { client.put_block(&url.to_owned(), "b", b"y").await }
        });
        tokio::task::yield_now().await;
        assert!(!held.is_finished());

        client.release_put_blocks();
        held.await.unwrap().unwrap();
        assert_eq!(client.staged_block_count(url), 2);
    }
}
