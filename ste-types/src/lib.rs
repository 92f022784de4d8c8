//! Types shared among the storage transfer engine crates.
//!
//! This covers the identifiers and status codes persisted into job part
//! plan files, the job part order submitted over the control plane, and the
//! request/response shapes of the `list` command.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod messages;
mod order;

pub use messages::*;
pub use order::*;

/// The 128-bit identifier of a job.
///
/// Byte-stable: the same 16 bytes appear in plan file headers, file names,
/// and the JSON wire format (as the canonical hyphenated string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a fresh random job id.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the raw 16 bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Reconstructs a job id from its raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The number of a job part within its job.
///
/// Parts of one job are ordered by part number; exactly one part carries the
/// final-part marker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartNumber(pub u32);

impl fmt::Display for PartNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The scheduling priority of a job part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    /// Dispatched before all other work.
    #[default]
    High = 0,
    /// Dispatched when no high priority work is pending.
    Medium = 1,
    /// Dispatched when no other work is pending.
    Low = 2,
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::High),
            1 => Ok(Self::Medium),
            2 => Ok(Self::Low),
            code => Err(InvalidCode("priority", code)),
        }
    }
}

/// The kind of endpoint a transfer reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Location {
    /// A path on the local filesystem.
    Local = 0,
    /// A blob URL on the remote blob service.
    Blob = 1,
    /// Not determined; transfers with an unknown endpoint are rejected.
    Unknown = 2,
}

impl From<Location> for u8 {
    fn from(value: Location) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for Location {
    type Error = InvalidCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Local),
            1 => Ok(Self::Blob),
            2 => Ok(Self::Unknown),
            code => Err(InvalidCode("location", code)),
        }
    }
}

/// The lifecycle status of a single transfer, as persisted in plan files.
///
/// A transfer starts `InProgress` and moves to exactly one of the terminal
/// states; once terminal it never changes again. `Any` is a query-only
/// sentinel (255) and is never written to a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TransferStatus {
    /// Scheduled or currently executing.
    InProgress = 0,
    /// All chunks transferred and committed.
    Complete = 1,
    /// Failed or cancelled before completion.
    Failed = 2,
    /// Skipped because the destination already exists and overwrite was
    /// disabled.
    FileAlreadyExists = 3,
    /// Matches every status; used in `list` filters only.
    Any = 255,
}

impl TransferStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::FileAlreadyExists)
    }

    /// Whether `other` satisfies this filter value.
    pub fn matches(&self, other: TransferStatus) -> bool {
        *self == Self::Any || *self == other
    }
}

impl From<TransferStatus> for u8 {
    fn from(value: TransferStatus) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for TransferStatus {
    type Error = InvalidCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::InProgress),
            1 => Ok(Self::Complete),
            2 => Ok(Self::Failed),
            3 => Ok(Self::FileAlreadyExists),
            255 => Ok(Self::Any),
            code => Err(InvalidCode("transfer status", code)),
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "TransferInProgress",
            Self::Complete => "TransferComplete",
            Self::Failed => "TransferFailed",
            Self::FileAlreadyExists => "FileAlreadyExists",
            Self::Any => "TransferAny",
        };
        f.write_str(s)
    }
}

impl FromStr for TransferStatus {
    type Err = InvalidStatusString;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TransferInProgress" => Ok(Self::InProgress),
            "TransferComplete" => Ok(Self::Complete),
            "TransferFailed" => Ok(Self::Failed),
            "FileAlreadyExists" => Ok(Self::FileAlreadyExists),
            "TransferAny" => Ok(Self::Any),
            other => Err(InvalidStatusString(other.to_owned())),
        }
    }
}

/// The status of a single chunk slot within a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// Slot allocated, chunk not yet scheduled.
    Inactive = 0,
    /// Chunk scheduled into a chunk queue.
    Active = 1,
    /// A worker is executing the chunk operation.
    Progress = 2,
    /// The chunk operation succeeded.
    Complete = 3,
    /// The chunk operation failed or was skipped due to cancellation.
    Failed = 4,
}

impl From<ChunkStatus> for u8 {
    fn from(value: ChunkStatus) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for ChunkStatus {
    type Error = InvalidCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Inactive),
            1 => Ok(Self::Active),
            2 => Ok(Self::Progress),
            3 => Ok(Self::Complete),
            4 => Ok(Self::Failed),
            code => Err(InvalidCode("chunk status", code)),
        }
    }
}

/// The roll-up status of a whole job, reported in progress summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Parts are still outstanding or transfers are still executing.
    InProgress,
    /// The final part was ordered and every transfer completed successfully.
    Completed,
    /// The final part was ordered and every transfer is terminal, but at
    /// least one failed.
    CompletedWithErrors,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::CompletedWithErrors => "CompletedWithErrors",
        };
        f.write_str(s)
    }
}

/// Error returned when a persisted or wire byte does not name a known code.
#[derive(Debug, Clone, Copy, Error)]
#[error("invalid {0} code {1}")]
pub struct InvalidCode(&'static str, u8);

/// Error returned when parsing a transfer status from its string form.
#[derive(Debug, Clone, Error)]
#[error("invalid transfer status {0:?}")]
pub struct InvalidStatusString(String);
