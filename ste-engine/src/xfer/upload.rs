//! Local file to block blob uploads.
//!
//! The prologue stats and maps the source, detects the put-blob fast path,
//! stages block ids and schedules one chunk message per block. Chunk
//! functions perform a single put-block each; the worker observing the last
//! chunk runs the epilogue, which commits the block list or finalizes the
//! cancelled transfer.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use memmap2::Mmap;
use ste_types::{BlobTransferAttributes, ChunkStatus, TransferStatus};
use tracing::Instrument;
use uuid::Uuid;

use crate::blob::{BlobError, BlobHeaders};
use crate::queue::ChunkMsg;

use super::TransferCtx;

/// How many leading bytes of the source are considered when sniffing the
/// content type.
const MIME_SNIFF_LEN: usize = 512;

struct UploadJob {
    ctx: TransferCtx,
    mapping: Mmap,
    block_ids: Vec<String>,
    headers: BlobHeaders,
    metadata: BTreeMap<String, String>,
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
    let attrs = ctx.entry.attributes.clone();

    if !attrs.force_write {
        match ctx.client().get_properties(&ctx.destination).await {
            Ok(_) => {
                tracing::info!("destination blob already exists, skipping");
                ctx.set_status(TransferStatus::FileAlreadyExists);
                return;
            }
            Err(BlobError::NotFound) => {}
            Err(err) => {
                tracing::error!(error = %err, "existence check failed");
                ctx.set_status(TransferStatus::Failed);
                return;
            }
        }
    }

    let file_meta = match tokio::fs::metadata(&ctx.source).await {
        Ok(meta) => meta,
        Err(err) => {
            tracing::error!(error = %err, source = %ctx.source, "cannot stat source file");
            ctx.set_status(TransferStatus::Failed);
            return;
        }
    };
    if file_meta.len() != source_size {
        tracing::warn!(
            expected = source_size,
            actual = file_meta.len(),
            "source changed size since enumeration"
        );
        ctx.set_status(TransferStatus::Failed);
        return;
    }

    // A zero-length file cannot be mapped; it goes through the fast path
    // with an empty body.
    let mapping = if source_size == 0 {
        None
    } else {
        match map_source(&ctx.source) {
            Ok(mapping) => Some(mapping),
            Err(err) => {
                tracing::error!(error = %err, source = %ctx.source, "cannot map source file");
                ctx.set_status(TransferStatus::Failed);
                return;
            }
        }
    };

    let contents: &[u8] = mapping.as_ref().map(|m| &m[..]).unwrap_or(&[]);
    let headers = build_headers(&attrs, contents);
    let metadata = parse_metadata(&attrs.metadata);

    if source_size <= block_size {
        put_whole_blob(ctx, mapping, headers, metadata).await;
        return;
    }

    let mapping = mapping.expect("sources larger than a block are mapped");
    let plan = ctx.plan();
    let mut block_ids = Vec::with_capacity(num_chunks as usize);
    for chunk_idx in 0..num_chunks {
        let block_id = Uuid::new_v4();
        if let Err(err) = plan.set_chunk_block_id(ctx.transfer_idx, chunk_idx, block_id.as_bytes())
        {
            tracing::error!(error = %err, "failed to stage block ids");
            ctx.set_status(TransferStatus::Failed);
            return;
        }
        block_ids.push(BASE64.encode(block_id.as_bytes()));
    }

    tracing::info!(chunks = num_chunks, block_size, "scheduling upload chunks");
    let priority = ctx.priority;
    let inner = Arc::clone(&ctx.inner);
    let transfer_idx = ctx.transfer_idx;
    let job = Arc::new(UploadJob {
        ctx,
        mapping,
        block_ids,
        headers,
        metadata,
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
                Box::pin(upload_chunk(worker_id, job, chunk_idx, offset, length).instrument(span))
            }),
        };
        // Blocks while the chunk queue is full; this is the intended
        // backpressure on the dispatcher.
        inner.chunks.push(priority, msg).await;
    }
}

async fn put_whole_blob(
    ctx: TransferCtx,
    mapping: Option<Mmap>,
    headers: BlobHeaders,
    metadata: BTreeMap<String, String>,
) {
    let body: &[u8] = mapping.as_ref().map(|m| &m[..]).unwrap_or(&[]);
    let _ = ctx
        .plan()
        .set_chunk_status(ctx.transfer_idx, 0, ChunkStatus::Progress);

    let result = ctx
        .run_cancellable(ctx.client().put_blob(&ctx.destination, body, &headers, &metadata))
        .await;
    match result {
        Ok(()) => {
            let _ = ctx
                .plan()
                .set_chunk_status(ctx.transfer_idx, 0, ChunkStatus::Complete);
            ctx.inner.throughput.add(body.len() as u64);
            ctx.set_status(TransferStatus::Complete);
            tracing::info!(bytes = body.len(), "put blob successful");
        }
        Err(err) => {
            let _ = ctx
                .plan()
                .set_chunk_status(ctx.transfer_idx, 0, ChunkStatus::Failed);
            ctx.set_status(TransferStatus::Failed);
            tracing::warn!(error = %err, "put blob failed");
        }
    }
    ctx.state.complete_chunk();
}

async fn upload_chunk(worker_id: usize, job: Arc<UploadJob>, chunk_idx: u32, offset: u64, length: u64) {
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

    let body = &job.mapping[offset as usize..(offset + length) as usize];
    let block_id = &job.block_ids[chunk_idx as usize];
    match ctx
        .run_cancellable(ctx.client().put_block(&ctx.destination, block_id, body))
        .await
    {
        Ok(()) => {
            let _ = ctx
                .plan()
                .set_chunk_status(ctx.transfer_idx, chunk_idx, ChunkStatus::Complete);
            ctx.inner.throughput.add(length);
        }
        Err(err) => {
            // One failed chunk fails the whole transfer; trip the token so
            // pending chunks skip their upload.
            tracing::warn!(error = %err, offset, "put block failed, cancelling transfer");
            ctx.state.cancel.cancel();
            let _ = ctx
                .plan()
                .set_chunk_status(ctx.transfer_idx, chunk_idx, ChunkStatus::Failed);
            ctx.set_status(TransferStatus::Failed);
        }
    }

    finish_chunk(&job, worker_id).await;
}

/// Counts the chunk as done and, when it was the last one, runs the
/// epilogue. The atomic counter makes the epilogue run exactly once per
/// transfer, whether chunks succeeded, failed, or were skipped.
async fn finish_chunk(job: &Arc<UploadJob>, worker_id: usize) {
    let ctx = &job.ctx;
    if ctx.state.complete_chunk() != ctx.state.num_chunks {
        return;
    }

    if ctx.cancelled() {
        tracing::info!(worker = worker_id, "finalizing cancelled transfer");
        ctx.set_status(TransferStatus::Failed);
        return;
    }

    let result = ctx
        .run_cancellable(ctx.client().put_block_list(
            &ctx.destination,
            &job.block_ids,
            &job.headers,
            &job.metadata,
        ))
        .await;
    match result {
        Ok(()) => {
            ctx.set_status(TransferStatus::Complete);
            tracing::info!(worker = worker_id, blocks = job.block_ids.len(), "upload successful");
        }
        Err(err) => {
            tracing::error!(worker = worker_id, error = %err, "failed to commit block list");
            ctx.set_status(TransferStatus::Failed);
        }
    }
}

fn map_source(path: &str) -> std::io::Result<Mmap> {
    let file = std::fs::File::open(path)?;
    unsafe { Mmap::map(&file) }
}

fn build_headers(attrs: &BlobTransferAttributes, contents: &[u8]) -> BlobHeaders {
    let content_type = if !attrs.content_type.is_empty() {
        Some(attrs.content_type.clone())
    } else if attrs.no_guess_mime_type {
        None
    } else {
        Some(sniff_content_type(contents))
    };
    let content_encoding =
        (!attrs.content_encoding.is_empty()).then(|| attrs.content_encoding.clone());

    BlobHeaders {
        content_type,
        content_encoding,
    }
}

fn sniff_content_type(contents: &[u8]) -> String {
    let head = &contents[..contents.len().min(MIME_SNIFF_LEN)];
    infer::get(head)
        .map(|kind| kind.mime_type().to_owned())
        .unwrap_or_else(|| "application/octet-stream".to_owned())
}

fn parse_metadata(metadata: &str) -> BTreeMap<String, String> {
    metadata
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_string_parses_into_pairs() {
        let parsed = parse_metadata("owner=backup; tier=cool;broken;=x");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["owner"], "backup");
        assert_eq!(parsed["tier"], "cool");
        assert_eq!(parsed[""], "x");
    }

    #[test]
    fn empty_metadata_parses_empty() {
        assert!(parse_metadata("").is_empty());
    }

    #[test]
    fn explicit_content_type_wins() {
        let attrs = BlobTransferAttributes {
            content_type: "text/csv".into(),
            ..Default::default()
        };
        let headers = build_headers(&attrs, b"%PDF-1.4 ...");
        assert_eq!(headers.content_type.as_deref(), Some("text/csv"));
    }

    #[test]
    fn content_type_is_sniffed_from_leading_bytes() {
        let attrs = BlobTransferAttributes::default();
        let headers = build_headers(&attrs, b"%PDF-1.4 rest of the document");
        assert_eq!(headers.content_type.as_deref(), Some("application/pdf"));

        let headers = build_headers(&attrs, b"just some text");
        assert_eq!(headers.content_type.as_deref(), Some("application/octet-stream"));
    }

    #[test]
    fn sniffing_can_be_suppressed() {
        let attrs = BlobTransferAttributes {
            no_guess_mime_type: true,
            ..Default::default()
        };
        let headers = build_headers(&attrs, b"%PDF-1.4");
        assert_eq!(headers.content_type, None);
    }
}
