//! Exponential retry policy layered over a blob client.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use super::{BlobClient, BlobError, BlobHeaders, BlobPage, BlobProperties};

/// The retry policy applied to every remote operation.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first.
    pub max_tries: u32,
    /// Budget for a single attempt; an elapsed try counts as transient.
    pub try_timeout: Duration,
    /// Delay before the first retry; doubles per attempt.
    pub retry_delay: Duration,
    /// Upper bound on the between-attempt delay.
    pub max_retry_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_tries: 5,
            try_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

/// Wraps a [`BlobClient`] with the engine's retry policy.
///
/// Transient errors and per-try timeouts are retried with exponential
/// backoff; anything else is returned as-is on the first occurrence.
#[derive(Debug)]
pub struct RetryingClient<C> {
    inner: C,
    options: RetryOptions,
}

impl<C: BlobClient> RetryingClient<C> {
    /// Wraps `inner` with the given retry policy.
    pub fn new(inner: C, options: RetryOptions) -> Self {
        Self { inner, options }
    }
}

async fn with_retries<T, F, Fut>(options: &RetryOptions, mut op: F) -> Result<T, BlobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BlobError>>,
{
    let mut delay = options.retry_delay;
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(options.try_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(BlobError::Transient("per-try timeout elapsed".into())),
        };

        match result {
            Err(err) if err.is_transient() && attempt < options.max_tries => {
                tracing::debug!(attempt, error = %err, "retrying transient blob error");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(options.max_retry_delay);
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[async_trait::async_trait]
impl<C: BlobClient> BlobClient for RetryingClient<C> {
    async fn put_block(
        &self,
        blob_url: &str,
        block_id: &str,
        body: &[u8],
    ) -> Result<(), BlobError> {
        with_retries(&self.options, || self.inner.put_block(blob_url, block_id, body)).await
    }

    async fn put_block_list(
        &self,
        blob_url: &str,
        block_ids: &[String],
        headers: &BlobHeaders,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), BlobError> {
        with_retries(&self.options, || {
            self.inner.put_block_list(blob_url, block_ids, headers, metadata)
        })
        .await
    }

    async fn put_blob(
        &self,
        blob_url: &str,
        body: &[u8],
        headers: &BlobHeaders,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), BlobError> {
        with_retries(&self.options, || self.inner.put_blob(blob_url, body, headers, metadata))
            .await
    }

    async fn get_properties(&self, blob_url: &str) -> Result<BlobProperties, BlobError> {
        with_retries(&self.options, || self.inner.get_properties(blob_url)).await
    }

    async fn get_range(
        &self,
        blob_url: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, BlobError> {
        with_retries(&self.options, || self.inner.get_range(blob_url, offset, length)).await
    }

    async fn list_blobs(
        &self,
        container_url: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<BlobPage, BlobError> {
        with_retries(&self.options, || self.inner.list_blobs(container_url, prefix, marker)).await
    }

    async fn create_container(&self, container_url: &str) -> Result<(), BlobError> {
        with_retries(&self.options, || self.inner.create_container(container_url)).await
    }
}
