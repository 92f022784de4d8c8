//! Block blob to local file downloads.
//!
//! The prologue cross-checks the remote size, pre-allocates and maps the
//! destination read-write, and schedules one get-range chunk per block.
//! Workers write their ranges directly into the mapping; the epilogue
//! flushes it and optionally restores the source's modification time.

use std::fs::FileTimes;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use memmap2::MmapMut;
use ste_types::{ChunkStatus, TransferStatus};
use tracing::Instrument;

use crate::queue::ChunkMsg;

use super::TransferCtx;

/// The destination mapping shared by all chunk workers of one download.
///
/// Each chunk writes only its own `[offset, offset + length)` range, so the
/// raw-pointer writes never overlap. The pointer is captured once at
/// construction and stays valid because the mapping itself never moves.
struct DestMapping {
    map: MmapMut,
    ptr: *mut u8,
    len: usize,
    file: std::fs::File,
}

unsafe impl Send for DestMapping {}
unsafe impl Sync for DestMapping {}

impl DestMapping {
    fn new(file: std::fs::File) -> std::io::Result<Self> {
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        let ptr = map.as_mut_ptr();
        Ok(Self {
            len: map.len(),
            map,
            ptr,
            file,
        })
    }

    /// Writes `data` at `offset`. Callers must write disjoint ranges.
    fn write_at(&self, offset: u64, data: &[u8]) {
        let offset = offset as usize;
        assert!(offset + data.len() <= self.len, "chunk write out of bounds");
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
    }

    fn flush(&self) -> std::io::Result<()> {
        self.map.flush()
    }

    fn set_modified(&self, modified: SystemTime) -> std::io::Result<()> {
        self.file.set_times(FileTimes::new().set_modified(modified))
    }
}

struct DownloadJob {
    ctx: TransferCtx,
    mapping: DestMapping,
    /// The source's modification time to restore on success, if requested.
    preserve_time: Option<SystemTime>,
}

pub(crate) async fn run(ctx: TransferCtx) {
    if ctx.cancelled() {
        tracing::info!("transfer cancelled before start");
        ctx.set_status(TransferStatus::Failed);
        return;
    }

    let record = match ctx.plan().transfer(ctx.transfer_idx) {
        Ok(record) => record,
        Err(err) => {
            tracing::error!(error = %err, "failed to read transfer record");
            ctx.set_status(TransferStatus::Failed);
            return;
        }
    };
    let source_size = record.source_size.get();
    let block_size = ctx.plan().block_size();
    let num_chunks = ctx.state.num_chunks;

    let props = match ctx
        .run_cancellable(ctx.client().get_properties(&ctx.source))
        .await
    {
        Ok(props) => props,
        Err(err) => {
            tracing::error!(error = %err, source = %ctx.source, "cannot fetch source blob properties");
            ctx.set_status(TransferStatus::Failed);
            return;
        }
    };
    if props.content_length != source_size {
        tracing::warn!(
            expected = source_size,
            actual = props.content_length,
            "source blob changed size since enumeration"
        );
        ctx.set_status(TransferStatus::Failed);
        return;
    }

    let preserve_time = ctx
        .entry
        .attributes
        .preserve_last_modified
        .then(|| SystemTime::from(props.last_modified));

    let file = match create_destination(&ctx.destination, source_size) {
        Ok(file) => file,
        Err(err) => {
            tracing::error!(error = %err, destination = %ctx.destination, "cannot create destination file");
            ctx.set_status(TransferStatus::Failed);
            return;
        }
    };

    // An empty blob needs no mapping and no remote reads; finish the dummy
    // chunk inline.
    if source_size == 0 {
        let _ = ctx
            .plan()
            .set_chunk_status(ctx.transfer_idx, 0, ChunkStatus::Complete);
        if let Some(modified) = preserve_time {
            if let Err(err) = file.set_times(FileTimes::new().set_modified(modified)) {
                tracing::warn!(error = %err, "failed to restore modification time");
            }
        }
        ctx.set_status(TransferStatus::Complete);
        ctx.state.complete_chunk();
        tracing::info!("download successful");
        return;
    }

    let mapping = match DestMapping::new(file) {
        Ok(mapping) => mapping,
        Err(err) => {
            tracing::error!(error = %err, "cannot map destination file");
            ctx.set_status(TransferStatus::Failed);
            return;
        }
    };

    tracing::info!(chunks = num_chunks, block_size, "scheduling download chunks");
    let priority = ctx.priority;
    let inner = Arc::clone(&ctx.inner);
    let transfer_idx = ctx.transfer_idx;
    let job = Arc::new(DownloadJob {
        ctx,
        mapping,
        preserve_time,
    });

    for chunk_idx in 0..num_chunks {
        let offset = u64::from(chunk_idx) * block_size;
        let length = block_size.min(source_size - offset);
        let _ = job
            .ctx
            .plan()
            .set_chunk_status(transfer_idx, chunk_idx, ChunkStatus::Active);

        let job = Arc::clone(&job);
        let msg = ChunkMsg {
            do_transfer: Box::new(move |worker_id| {
                let ctx = &job.ctx;
                let span = tracing::info_span!(
                    "chunk",
                    job_id = %ctx.job_id,
                    part = %ctx.part_num,
                    transfer = ctx.transfer_idx,
                    chunk = chunk_idx,
                    worker = worker_id,
                );
                Box::pin(download_chunk(worker_id, job, chunk_idx, offset, length).instrument(span))
            }),
        };
        inner.chunks.push(priority, msg).await;
    }
}

fn create_destination(destination: &str, size: u64) -> std::io::Result<std::fs::File> {
    if let Some(parent) = Path::new(destination).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(destination)?;
    file.set_len(size)?;
    Ok(file)
}

async fn download_chunk(
    worker_id: usize,
    job: Arc<DownloadJob>,
    chunk_idx: u32,
    offset: u64,
    length: u64,
) {
    let ctx = &job.ctx;

    if ctx.cancelled() {
        tracing::info!("transfer cancelled, not picking up chunk");
        let _ = ctx
            .plan()
            .set_chunk_status(ctx.transfer_idx, chunk_idx, ChunkStatus::Failed);
        finish_chunk(&job, worker_id).await;
        return;
    }

    let _ = ctx
        .plan()
        .set_chunk_status(ctx.transfer_idx, chunk_idx, ChunkStatus::Progress);

    let result = ctx
        .run_cancellable(ctx.client().get_range(&ctx.source, offset, length))
        .await;
    match result {
        Ok(bytes) if bytes.len() as u64 == length => {
            job.mapping.write_at(offset, &bytes);
            let _ = ctx
                .plan()
                .set_chunk_status(ctx.transfer_idx, chunk_idx, ChunkStatus::Complete);
            ctx.inner.throughput.add(length);
        }
        Ok(bytes) => {
            tracing::warn!(
                expected = length,
                actual = bytes.len(),
                offset,
                "short range read, cancelling transfer"
            );
            ctx.state.cancel.cancel();
            let _ = ctx
                .plan()
                .set_chunk_status(ctx.transfer_idx, chunk_idx, ChunkStatus::Failed);
            ctx.set_status(TransferStatus::Failed);
        }
        Err(err) => {
            tracing::warn!(error = %err, offset, "get range failed, cancelling transfer");
            ctx.state.cancel.cancel();
            let _ = ctx
                .plan()
                .set_chunk_status(ctx.transfer_idx, chunk_idx, ChunkStatus::Failed);
            ctx.set_status(TransferStatus::Failed);
        }
    }

    finish_chunk(&job, worker_id).await;
}

async fn finish_chunk(job: &Arc<DownloadJob>, worker_id: usize) {
    let ctx = &job.ctx;
    if ctx.state.complete_chunk() != ctx.state.num_chunks {
        return;
    }

    if ctx.cancelled() {
        tracing::info!(worker = worker_id, "finalizing cancelled transfer");
        ctx.set_status(TransferStatus::Failed);
        return;
    }

    if let Err(err) = job.mapping.flush() {
        tracing::error!(worker = worker_id, error = %err, "failed to flush destination");
        ctx.set_status(TransferStatus::Failed);
        return;
    }
    if let Some(modified) = job.preserve_time {
        if let Err(err) = job.mapping.set_modified(modified) {
            tracing::warn!(error = %err, "failed to restore modification time");
        }
    }
    ctx.set_status(TransferStatus::Complete);
    tracing::info!(worker = worker_id, "download successful");
}
