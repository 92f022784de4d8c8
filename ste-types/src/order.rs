//! The job part order and its transfer entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, Location, PartNumber, Priority};

/// A single source to destination file operation.
///
/// Immutable once queued; the recorded size and modification time are used
/// to detect a source that changed between enumeration and transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CopyTransfer {
    /// Local path or blob URL the data is read from.
    pub source: String,
    /// Local path or blob URL the data is written to.
    pub destination: String,
    /// Modification time of the source at enumeration time.
    pub last_modified: DateTime<Utc>,
    /// Size of the source in bytes at enumeration time.
    pub source_size: u64,
}

/// Optional blob request attributes carried by a job part order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BlobTransferAttributes {
    /// Content type set on uploaded blobs; empty means "guess or omit".
    pub content_type: String,
    /// Content encoding set on uploaded blobs.
    pub content_encoding: String,
    /// User-defined metadata as a `key=value;key=value` string.
    pub metadata: String,
    /// Upload chunk size in bytes; 0 lets the engine choose.
    pub block_size_bytes: u64,
    /// Suppress content type sniffing from the first bytes of the source.
    pub no_guess_mime_type: bool,
    /// When downloading, set the file's mtime to the blob's last-modified.
    pub preserve_last_modified: bool,
    /// Overwrite existing destinations. When disabled, an upload whose
    /// destination blob already exists is marked `FileAlreadyExists`
    /// without performing any data I/O.
    #[serde(default = "default_true")]
    pub force_write: bool,
}

fn default_true() -> bool {
    true
}

/// A bounded batch of transfers belonging to one job.
///
/// One order maps to exactly one plan file. Orders are the unit of
/// submission on the control plane's `copy` verb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CopyJobPartOrder {
    /// Version of the submitting frontend.
    pub version: u32,
    /// Identifier of the job this part belongs to.
    pub job_id: JobId,
    /// Number of this part within the job.
    pub part_num: PartNumber,
    /// Whether this is the last part of the job.
    pub is_final_part: bool,
    /// Scheduling priority for every transfer in this part.
    pub priority: Priority,
    /// Kind of all sources in this part.
    pub source_type: Location,
    /// Kind of all destinations in this part.
    pub destination_type: Location,
    /// The transfers of this part.
    pub transfers: Vec<CopyTransfer>,
    /// Requested log verbosity for this part's transfer logging.
    pub log_verbosity: u8,
    /// Whether the submitting command returns without polling completion.
    pub is_background: bool,
    /// Optional blob attributes applied to every transfer.
    pub optional_attributes: BlobTransferAttributes,
}
