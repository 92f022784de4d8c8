//! The capability interface to the remote blob service.
//!
//! The engine consumes a polymorphic [`BlobClient`]; authentication and
//! transport are the client's concern. [`RetryingClient`] layers the
//! engine's retry policy over any client, and [`InMemoryBlobClient`] backs
//! the engine tests without a network.

mod memory;
mod retry;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::{CommittedBlob, InMemoryBlobClient};
pub use retry::{RetryOptions, RetryingClient};

/// A type-erased, shareable [`BlobClient`].
pub type SharedBlobClient = Arc<dyn BlobClient>;

/// Errors surfaced by blob clients.
///
/// Chunk functions never propagate these up the call stack; they are
/// recorded in the plan and on the transfer's cancellation token.
#[derive(Debug, Error)]
pub enum BlobError {
    /// A retryable condition: timeout, throttling, or a 5xx answer.
    #[error("transient service error: {0}")]
    Transient(String),

    /// A non-retryable service failure.
    #[error("service error: {0}")]
    Fatal(String),

    /// The addressed blob does not exist.
    #[error("blob not found")]
    NotFound,

    /// The operation was abandoned because the transfer was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl BlobError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Properties of a remote blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    /// Size of the blob in bytes.
    pub content_length: u64,
    /// Last modification time of the blob.
    pub last_modified: DateTime<Utc>,
}

/// Request headers applied when creating a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobHeaders {
    /// The content type, explicit or sniffed from the source.
    pub content_type: Option<String>,
    /// The content encoding, if any.
    pub content_encoding: Option<String>,
}

/// One blob in a container listing.
#[derive(Debug, Clone)]
pub struct BlobItem {
    /// Full URL of the blob.
    pub name: String,
    /// Properties of the blob.
    pub properties: BlobProperties,
}

/// One page of a container listing.
#[derive(Debug, Clone, Default)]
pub struct BlobPage {
    /// The blobs of this page.
    pub items: Vec<BlobItem>,
    /// Continuation marker; `None` on the last page.
    pub next_marker: Option<String>,
}

/// The remote operations the engine needs.
#[async_trait::async_trait]
pub trait BlobClient: Debug + Send + Sync + 'static {
    /// Stages one block of a block blob under the given block id.
    async fn put_block(&self, blob_url: &str, block_id: &str, body: &[u8])
    -> Result<(), BlobError>;

    /// Commits the staged blocks of a blob in the given order.
    async fn put_block_list(
        &self,
        blob_url: &str,
        block_ids: &[String],
        headers: &BlobHeaders,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), BlobError>;

    /// Creates a blob in a single call; used for sources up to one block.
    async fn put_blob(
        &self,
        blob_url: &str,
        body: &[u8],
        headers: &BlobHeaders,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), BlobError>;

    /// Fetches size and modification time of a blob.
    async fn get_properties(&self, blob_url: &str) -> Result<BlobProperties, BlobError>;

    /// Reads a byte range of a blob.
    async fn get_range(&self, blob_url: &str, offset: u64, length: u64)
    -> Result<Bytes, BlobError>;

    /// Lists blobs of a container, filtered by prefix, one page at a time.
    async fn list_blobs(
        &self,
        container_url: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<BlobPage, BlobError>;

    /// Creates a container; succeeds if it already exists.
    async fn create_container(&self, container_url: &str) -> Result<(), BlobError>;
}
