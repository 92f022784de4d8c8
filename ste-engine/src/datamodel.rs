//! On-disk layout of job part plan files.
//!
//! A plan file is a header, one transfer record per transfer, and a variable
//! tail holding the raw source/destination strings plus one chunk slot per
//! chunk. All multi-byte fields are little-endian at explicit offsets; every
//! struct is byte-aligned, so the file layout is exactly the struct layout.
//!
//! The `status` and `completion_time` fields of [`PlanTransfer`] and the
//! `status` field of [`PlanChunk`] are mutated in place through atomic views
//! while the file is mapped; everything else is immutable after creation.

use pack1::{U16LE, U32LE, U64LE};
use watto::Pod;

/// Version of the plan schema; incremented whenever the layout changes.
pub const DATA_SCHEMA_VERSION: u32 = 0;

/// File extension of plan files in the state directory.
pub const PLAN_FILE_EXTENSION: &str = "steplan";

/// Maximum stored length of the content type attribute.
pub const MAX_SIZE_CONTENT_TYPE: usize = 256;
/// Maximum stored length of the content encoding attribute.
pub const MAX_SIZE_CONTENT_ENCODING: usize = 256;
/// Maximum stored length of the metadata attribute string.
pub const MAX_SIZE_METADATA: usize = 1000;

/// The fixed header at offset 0 of every plan file.
#[derive(Debug)]
#[repr(C)]
pub struct PlanHeader {
    /// Schema version of the rest of the file.
    pub version: U32LE,
    /// Raw bytes of the job id.
    pub job_id: [u8; 16],
    /// Part number within the job.
    pub part_num: U32LE,
    /// 1 if this is the final part of the job.
    pub is_final_part: u8,
    /// Scheduling priority code.
    pub priority: u8,
    /// Seconds to keep the plan around once all transfers are terminal.
    pub ttl_after_completion: U32LE,
    /// Location code of all sources in this part.
    pub src_location: u8,
    /// Location code of all destinations in this part.
    pub dst_location: u8,
    /// Number of transfer records following the header.
    pub num_transfers: U32LE,
    /// Blob request attributes shared by all transfers of the part.
    pub blob_data: PlanBlobData,
}
unsafe impl Pod for PlanHeader {}

/// Blob attributes embedded in the plan header.
#[derive(Debug)]
#[repr(C)]
pub struct PlanBlobData {
    /// Used length of the content type slot.
    pub content_type_len: u8,
    /// Content type bytes, zero padded.
    pub content_type: [u8; MAX_SIZE_CONTENT_TYPE],
    /// Used length of the content encoding slot.
    pub content_encoding_len: u8,
    /// Content encoding bytes, zero padded.
    pub content_encoding: [u8; MAX_SIZE_CONTENT_ENCODING],
    /// Used length of the metadata slot.
    pub metadata_len: U16LE,
    /// Metadata as a raw `key=value;key=value` string, zero padded.
    pub metadata: [u8; MAX_SIZE_METADATA],
    /// Chunk size in bytes chosen at submission time.
    pub block_size: U64LE,
}
unsafe impl Pod for PlanBlobData {}

impl PlanBlobData {
    /// The stored content type bytes.
    pub fn content_type(&self) -> &[u8] {
        &self.content_type[..self.content_type_len as usize]
    }

    /// The stored content encoding bytes.
    pub fn content_encoding(&self) -> &[u8] {
        &self.content_encoding[..self.content_encoding_len as usize]
    }

    /// The stored metadata string bytes.
    pub fn metadata(&self) -> &[u8] {
        &self.metadata[..self.metadata_len.get() as usize]
    }
}

/// One transfer record; `num_transfers` of these follow the header.
///
/// `offset` is the absolute file offset of the transfer's tail region:
/// `src_len` source bytes, `dst_len` destination bytes, then `chunk_count`
/// [`PlanChunk`] slots.
#[derive(Debug)]
#[repr(C)]
pub struct PlanTransfer {
    /// Absolute file offset of this transfer's tail region.
    pub offset: U64LE,
    /// Byte length of the source string.
    pub src_len: U16LE,
    /// Byte length of the destination string.
    pub dst_len: U16LE,
    /// Number of chunk slots in the tail region; at least 1.
    pub chunk_count: U16LE,
    /// Source modification time as unix seconds, captured at enumeration.
    pub modified_time: U32LE,
    /// Transfer status code; written only through the atomic view.
    pub status: u8,
    pub source_size: U64LE,
    /// Unix seconds of the terminal transition; 0 while non-terminal.
    /// Written before `status` so that a terminal status implies a
    /// populated timestamp.
    pub completion_time: U64LE,
}
unsafe impl Pod for PlanTransfer {}

/// One chunk slot in a transfer's tail region.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PlanChunk {
    /// Raw bytes of the block id staged for this chunk; zero until the
    /// transfer prologue assigns ids.
    pub block_id: [u8; 16],
    /// Chunk status code; written only by the worker owning the chunk.
    pub status: u8,
}
unsafe impl Pod for PlanChunk {}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;

    #[test]
    fn layout_is_byte_aligned() {
        // Every field is a byte array or a little-endian byte-array newtype,
        // so the structs must have no padding at all.
        assert_eq!(mem::align_of::<PlanHeader>(), 1);
        assert_eq!(mem::size_of::<PlanBlobData>(), 1 + 256 + 1 + 256 + 2 + 1000 + 8);
        assert_eq!(
            mem::size_of::<PlanHeader>(),
            4 + 16 + 4 + 1 + 1 + 4 + 1 + 1 + 4 + mem::size_of::<PlanBlobData>()
        );
        assert_eq!(mem::size_of::<PlanTransfer>(), 8 + 2 + 2 + 2 + 4 + 1 + 8 + 8);
        assert_eq!(mem::size_of::<PlanChunk>(), 17);
    }
}
