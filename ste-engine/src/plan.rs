//! Creation, mapping and in-place mutation of job part plan files.
//!
//! The plan file is both the work queue and the progress ledger of a job
//! part: chunk workers mutate their disjoint status bytes through atomic
//! views into the mapping with zero copy, and listers read without blocking
//! writers. No coarse lock is ever taken across the mapping.

use std::fs::OpenOptions;
use std::io::Write;
use std::mem::{offset_of, size_of};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::MmapMut;
use ste_types::{ChunkStatus, CopyJobPartOrder, JobId, PartNumber, Priority, TransferStatus};
use thiserror::Error;
use watto::Pod;

use crate::datamodel::{
    DATA_SCHEMA_VERSION, MAX_SIZE_CONTENT_ENCODING, MAX_SIZE_CONTENT_TYPE, MAX_SIZE_METADATA,
    PLAN_FILE_EXTENSION, PlanBlobData, PlanChunk, PlanHeader, PlanTransfer,
};

/// Errors raised by the plan codec.
#[derive(Debug, Error)]
pub enum PlanError {
    /// An I/O error while creating, mapping or deleting a plan file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The file carries a schema version this engine does not understand.
    #[error("unsupported plan schema version {found}, expected {DATA_SCHEMA_VERSION}")]
    VersionMismatch {
        /// The version found in the file header.
        found: u32,
    },

    /// The file failed a structural check and cannot be trusted.
    #[error("corrupt plan file: {0}")]
    Corrupt(&'static str),

    /// An order field does not fit the fixed plan layout.
    #[error("order not representable in a plan file: {0}")]
    Unrepresentable(&'static str),

    /// A transfer index beyond `num_transfers`.
    #[error("transfer index {0} out of range")]
    TransferOutOfRange(u32),

    /// A chunk index beyond the transfer's `chunk_count`.
    #[error("chunk index {0} out of range")]
    ChunkOutOfRange(u32),
}

/// Returns the path of the plan file for the given job part.
pub fn plan_path(state_dir: &Path, job_id: JobId, part_num: PartNumber) -> PathBuf {
    state_dir.join(format!("{job_id}-{part_num}.{PLAN_FILE_EXTENSION}"))
}

/// Returns the number of chunks a source of the given size splits into.
///
/// A zero-byte source still gets one dummy chunk, which keeps the chunk
/// accounting uniform across all transfers.
pub fn chunk_count_for(source_size: u64, block_size: u64) -> u64 {
    source_size.div_ceil(block_size).max(1)
}

/// Returns the current time as unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A memory-mapped plan file.
///
/// The handle validates the file's structure once when created or opened;
/// all accessors afterwards rely on that validation. Status bytes and
/// completion timestamps are accessed exclusively through atomic views, so
/// concurrent chunk workers and listers never race on the mapping.
#[derive(Debug)]
pub struct PlanHandle {
    path: PathBuf,
    map: MmapMut,
}

impl PlanHandle {
    /// Materializes a new plan file for the given order and maps it.
    ///
    /// `block_size` is the resolved chunk size (the order's value, or the
    /// engine's choice when the order left it at 0) and is persisted into
    /// the plan's blob data. Fails if the file already exists.
    pub fn create(
        path: &Path,
        order: &CopyJobPartOrder,
        block_size: u64,
        ttl_after_completion: u32,
    ) -> Result<Self, PlanError> {
        let bytes = serialize_plan(order, block_size, ttl_after_completion)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        let map = unsafe { MmapMut::map_mut(&file)? };
        validate(&map)?;

        Ok(Self {
            path: path.to_owned(),
            map,
        })
    }

    /// Maps an existing plan file, verifying schema version and structure.
    pub fn open(path: &Path) -> Result<Self, PlanError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        validate(&map)?;

        Ok(Self {
            path: path.to_owned(),
            map,
        })
    }

    /// The path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The plan header.
    pub fn header(&self) -> &PlanHeader {
        let (header, _) = PlanHeader::ref_from_prefix(&self.map).expect("structure validated on open");
        header
    }

    /// The job this plan belongs to.
    pub fn job_id(&self) -> JobId {
        JobId::from_bytes(self.header().job_id)
    }

    /// The part number of this plan within its job.
    pub fn part_num(&self) -> PartNumber {
        PartNumber(self.header().part_num.get())
    }

    /// The scheduling priority recorded for this part.
    pub fn priority(&self) -> Priority {
        Priority::try_from(self.header().priority).expect("structure validated on open")
    }

    /// Whether this part is marked as the job's final part.
    pub fn is_final_part(&self) -> bool {
        self.header().is_final_part != 0
    }

    /// The chunk size recorded for this part.
    pub fn block_size(&self) -> u64 {
        self.header().blob_data.block_size.get()
    }

    /// The number of transfer records in this plan.
    pub fn num_transfers(&self) -> u32 {
        self.header().num_transfers.get()
    }

    /// All transfer records in order.
    pub fn transfers(&self) -> &[PlanTransfer] {
        let rest = &self.map[size_of::<PlanHeader>()..];
        let (records, _) = PlanTransfer::slice_from_prefix(rest, self.num_transfers() as usize)
            .expect("structure validated on open");
        records
    }

    /// The transfer record at the given index.
    pub fn transfer(&self, transfer_idx: u32) -> Result<&PlanTransfer, PlanError> {
        self.transfers()
            .get(transfer_idx as usize)
            .ok_or(PlanError::TransferOutOfRange(transfer_idx))
    }

    /// The source string of a transfer.
    pub fn source(&self, transfer_idx: u32) -> Result<&str, PlanError> {
        let record = self.transfer(transfer_idx)?;
        let start = record.offset.get() as usize;
        let bytes = &self.map[start..start + record.src_len.get() as usize];
        std::str::from_utf8(bytes).map_err(|_| PlanError::Corrupt("source is not valid utf-8"))
    }

    /// The destination string of a transfer.
    pub fn destination(&self, transfer_idx: u32) -> Result<&str, PlanError> {
        let record = self.transfer(transfer_idx)?;
        let start = record.offset.get() as usize + record.src_len.get() as usize;
        let bytes = &self.map[start..start + record.dst_len.get() as usize];
        std::str::from_utf8(bytes).map_err(|_| PlanError::Corrupt("destination is not valid utf-8"))
    }

    /// The current status of a transfer.
    pub fn transfer_status(&self, transfer_idx: u32) -> Result<TransferStatus, PlanError> {
        let offset = self.transfer_field_offset(transfer_idx, offset_of!(PlanTransfer, status))?;
        TransferStatus::try_from(self.byte(offset).load(Ordering::Acquire))
            .map_err(|_| PlanError::Corrupt("invalid transfer status byte"))
    }

    /// Moves a transfer to the given status.
    ///
    /// Terminal transitions write `completion_time` before the status byte
    /// and only succeed from the in-progress state, which makes terminal
    /// statuses sticky. Returns whether this call performed the transition.
    pub fn set_transfer_status(
        &self,
        transfer_idx: u32,
        status: TransferStatus,
    ) -> Result<bool, PlanError> {
        debug_assert!(status != TransferStatus::Any);
        let status_offset = self.transfer_field_offset(transfer_idx, offset_of!(PlanTransfer, status))?;
        let cell = self.byte(status_offset);

        if !status.is_terminal() {
            cell.store(status.into(), Ordering::Release);
            return Ok(true);
        }

        let current = TransferStatus::try_from(cell.load(Ordering::Acquire))
            .map_err(|_| PlanError::Corrupt("invalid transfer status byte"))?;
        if current.is_terminal() {
            return Ok(false);
        }

        let completion_offset =
            self.transfer_field_offset(transfer_idx, offset_of!(PlanTransfer, completion_time))?;
        self.store_bytes(completion_offset, &unix_now().to_le_bytes());

        Ok(cell
            .compare_exchange(
                TransferStatus::InProgress.into(),
                status.into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok())
    }

    /// The terminal transition time of a transfer; 0 while non-terminal.
    pub fn completion_time(&self, transfer_idx: u32) -> Result<u64, PlanError> {
        let offset =
            self.transfer_field_offset(transfer_idx, offset_of!(PlanTransfer, completion_time))?;
        Ok(u64::from_le_bytes(self.load_bytes(offset)))
    }

    /// Whether every transfer of this part has reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        (0..self.num_transfers()).all(|idx| {
            self.transfer_status(idx)
                .map(|status| status.is_terminal())
                .unwrap_or(false)
        })
    }

    /// The latest terminal transition time across all transfers.
    pub fn latest_completion_time(&self) -> u64 {
        (0..self.num_transfers())
            .map(|idx| self.completion_time(idx).unwrap_or(0))
            .max()
            .unwrap_or(0)
    }

    /// The current status of a chunk slot.
    pub fn chunk_status(&self, transfer_idx: u32, chunk_idx: u32) -> Result<ChunkStatus, PlanError> {
        let offset = self.chunk_slot_offset(transfer_idx, chunk_idx)? + offset_of!(PlanChunk, status);
        ChunkStatus::try_from(self.byte(offset).load(Ordering::Acquire))
            .map_err(|_| PlanError::Corrupt("invalid chunk status byte"))
    }

    /// Advances the status byte of a single chunk slot.
    pub fn set_chunk_status(
        &self,
        transfer_idx: u32,
        chunk_idx: u32,
        status: ChunkStatus,
    ) -> Result<(), PlanError> {
        let offset = self.chunk_slot_offset(transfer_idx, chunk_idx)? + offset_of!(PlanChunk, status);
        self.byte(offset).store(status.into(), Ordering::Release);
        Ok(())
    }

    /// Records the block id staged for a chunk.
    ///
    /// Called by the transfer prologue before any chunk is scheduled.
    pub fn set_chunk_block_id(
        &self,
        transfer_idx: u32,
        chunk_idx: u32,
        block_id: &[u8; 16],
    ) -> Result<(), PlanError> {
        let offset = self.chunk_slot_offset(transfer_idx, chunk_idx)? + offset_of!(PlanChunk, block_id);
        self.store_bytes(offset, block_id);
        Ok(())
    }

    /// The block id recorded for a chunk.
    pub fn chunk_block_id(&self, transfer_idx: u32, chunk_idx: u32) -> Result<[u8; 16], PlanError> {
        let offset = self.chunk_slot_offset(transfer_idx, chunk_idx)? + offset_of!(PlanChunk, block_id);
        Ok(self.load_bytes(offset))
    }

    /// Removes the backing file; the mapping stays valid until dropped.
    pub fn remove_file(&self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }

    fn transfer_field_offset(&self, transfer_idx: u32, field: usize) -> Result<usize, PlanError> {
        if transfer_idx >= self.num_transfers() {
            return Err(PlanError::TransferOutOfRange(transfer_idx));
        }
        Ok(size_of::<PlanHeader>() + transfer_idx as usize * size_of::<PlanTransfer>() + field)
    }

    fn chunk_slot_offset(&self, transfer_idx: u32, chunk_idx: u32) -> Result<usize, PlanError> {
        let record = self.transfer(transfer_idx)?;
        if chunk_idx >= u32::from(record.chunk_count.get()) {
            return Err(PlanError::ChunkOutOfRange(chunk_idx));
        }
        Ok(record.offset.get() as usize
            + record.src_len.get() as usize
            + record.dst_len.get() as usize
            + chunk_idx as usize * size_of::<PlanChunk>())
    }

    fn byte(&self, offset: usize) -> &AtomicU8 {
        debug_assert!(offset < self.map.len());
        // Status bytes and timestamps are mutated while other threads hold
        // shared references into the mapping; all such accesses go through
        // this atomic view.
        unsafe { &*self.map.as_ptr().add(offset).cast::<AtomicU8>() }
    }

    fn load_bytes<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.byte(offset + i).load(Ordering::Relaxed);
        }
        out
    }

    fn store_bytes(&self, offset: usize, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.byte(offset + i).store(*byte, Ordering::Relaxed);
        }
    }
}

fn serialize_plan(
    order: &CopyJobPartOrder,
    block_size: u64,
    ttl_after_completion: u32,
) -> Result<Vec<u8>, PlanError> {
    if block_size == 0 {
        return Err(PlanError::Unrepresentable("block size must be non-zero"));
    }

    let attrs = &order.optional_attributes;
    // The length prefixes are a single byte, so the effective limit is one
    // below the slot size.
    if attrs.content_type.len() >= MAX_SIZE_CONTENT_TYPE {
        return Err(PlanError::Unrepresentable("content type too long"));
    }
    if attrs.content_encoding.len() >= MAX_SIZE_CONTENT_ENCODING {
        return Err(PlanError::Unrepresentable("content encoding too long"));
    }
    if attrs.metadata.len() > MAX_SIZE_METADATA {
        return Err(PlanError::Unrepresentable("metadata too long"));
    }

    let mut blob_data = PlanBlobData {
        content_type_len: attrs.content_type.len() as u8,
        content_type: [0; MAX_SIZE_CONTENT_TYPE],
        content_encoding_len: attrs.content_encoding.len() as u8,
        content_encoding: [0; MAX_SIZE_CONTENT_ENCODING],
        metadata_len: (attrs.metadata.len() as u16).into(),
        metadata: [0; MAX_SIZE_METADATA],
        block_size: block_size.into(),
    };
    blob_data.content_type[..attrs.content_type.len()]
        .copy_from_slice(attrs.content_type.as_bytes());
    blob_data.content_encoding[..attrs.content_encoding.len()]
        .copy_from_slice(attrs.content_encoding.as_bytes());
    blob_data.metadata[..attrs.metadata.len()].copy_from_slice(attrs.metadata.as_bytes());

    let header = PlanHeader {
        version: DATA_SCHEMA_VERSION.into(),
        job_id: *order.job_id.as_bytes(),
        part_num: order.part_num.0.into(),
        is_final_part: order.is_final_part as u8,
        priority: order.priority.into(),
        ttl_after_completion: ttl_after_completion.into(),
        src_location: order.source_type.into(),
        dst_location: order.destination_type.into(),
        num_transfers: (order.transfers.len() as u32).into(),
        blob_data,
    };

    let mut records = Vec::with_capacity(order.transfers.len());
    let mut tail_offset =
        size_of::<PlanHeader>() + order.transfers.len() * size_of::<PlanTransfer>();
    for transfer in &order.transfers {
        if transfer.source.len() > u16::MAX as usize {
            return Err(PlanError::Unrepresentable("source path too long"));
        }
        if transfer.destination.len() > u16::MAX as usize {
            return Err(PlanError::Unrepresentable("destination path too long"));
        }
        let chunk_count = chunk_count_for(transfer.source_size, block_size);
        if chunk_count > u64::from(u16::MAX) {
            return Err(PlanError::Unrepresentable("too many chunks for one transfer"));
        }

        records.push(PlanTransfer {
            offset: (tail_offset as u64).into(),
            src_len: (transfer.source.len() as u16).into(),
            dst_len: (transfer.destination.len() as u16).into(),
            chunk_count: (chunk_count as u16).into(),
            modified_time: (transfer.last_modified.timestamp().clamp(0, u32::MAX.into()) as u32)
                .into(),
            status: TransferStatus::InProgress.into(),
            source_size: transfer.source_size.into(),
            completion_time: 0u64.into(),
        });
        tail_offset += transfer.source.len()
            + transfer.destination.len()
            + chunk_count as usize * size_of::<PlanChunk>();
    }

    let mut buf = Vec::with_capacity(tail_offset);
    buf.extend_from_slice(header.as_bytes());
    for record in &records {
        buf.extend_from_slice(record.as_bytes());
    }
    for (transfer, record) in order.transfers.iter().zip(&records) {
        buf.extend_from_slice(transfer.source.as_bytes());
        buf.extend_from_slice(transfer.destination.as_bytes());
        buf.resize(buf.len() + record.chunk_count.get() as usize * size_of::<PlanChunk>(), 0);
    }
    debug_assert_eq!(buf.len(), tail_offset);

    Ok(buf)
}

fn validate(map: &[u8]) -> Result<(), PlanError> {
    if map.len() < 4 {
        return Err(PlanError::Corrupt("file smaller than version field"));
    }
    let version = u32::from_le_bytes(map[..4].try_into().expect("slice of length 4"));
    if version != DATA_SCHEMA_VERSION {
        return Err(PlanError::VersionMismatch { found: version });
    }

    let (header, rest) =
        PlanHeader::ref_from_prefix(map).ok_or(PlanError::Corrupt("truncated header"))?;
    Priority::try_from(header.priority).map_err(|_| PlanError::Corrupt("invalid priority byte"))?;

    let num_transfers = header.num_transfers.get() as usize;
    let (records, _) = PlanTransfer::slice_from_prefix(rest, num_transfers)
        .ok_or(PlanError::Corrupt("truncated transfer records"))?;

    let mut expected = size_of::<PlanHeader>() + num_transfers * size_of::<PlanTransfer>();
    for record in records {
        if record.chunk_count.get() == 0 {
            return Err(PlanError::Corrupt("transfer with zero chunk slots"));
        }
        if record.offset.get() as usize != expected {
            return Err(PlanError::Corrupt("transfer tail offset mismatch"));
        }
        expected += record.src_len.get() as usize
            + record.dst_len.get() as usize
            + record.chunk_count.get() as usize * size_of::<PlanChunk>();
    }
    if expected != map.len() {
        return Err(PlanError::Corrupt("file size does not match layout"));
    }

    Ok(())
}
