//! End-to-end engine tests against the in-memory blob client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};
use ste_engine::blob::InMemoryBlobClient;
use ste_engine::plan::{PlanHandle, plan_path};
use ste_engine::{Engine, EngineConfig, EngineError, ListResponse};
use ste_types::{
    BlobTransferAttributes, ChunkStatus, CopyJobPartOrder, CopyTransfer, JobId, JobStatus,
    ListJobPartsTransfers, Location, PartNumber, Priority, TransferStatus,
};

const CONTAINER: &str = "https://acct.blob.example.net/container";

async fn spawn_engine(dir: &Path, client: &InMemoryBlobClient, block_size: u64) -> Engine {
    let mut config = EngineConfig::new(dir);
    config.block_size = block_size;
    config.workers = 4;
    Engine::spawn(config, Arc::new(client.clone())).await.unwrap()
}

fn write_source(dir: &Path, name: &str, len: usize) -> (String, Vec<u8>) {
    let contents: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let path = dir.join(name);
    std::fs::write(&path, &contents).unwrap();
    (path.to_string_lossy().into_owned(), contents)
}

fn upload_order(
    job_id: JobId,
    part_num: u32,
    is_final_part: bool,
    transfers: Vec<CopyTransfer>,
    attributes: BlobTransferAttributes,
) -> CopyJobPartOrder {
    CopyJobPartOrder {
        version: 1,
        job_id,
        part_num: PartNumber(part_num),
        is_final_part,
        priority: Priority::High,
        source_type: Location::Local,
        destination_type: Location::Blob,
        transfers,
        log_verbosity: 5,
        is_background: false,
        optional_attributes: attributes,
    }
}

fn local_transfer(source: &str, size: u64, blob_name: &str) -> CopyTransfer {
    CopyTransfer {
        source: source.to_owned(),
        destination: format!("{CONTAINER}/{blob_name}"),
        last_modified: Utc::now(),
        source_size: size,
    }
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

fn transfer_status(engine: &Engine, job_id: JobId, part: u32, idx: u32) -> TransferStatus {
    let plan = PlanHandle::open(&plan_path(engine.state_dir(), job_id, PartNumber(part))).unwrap();
    plan.transfer_status(idx).unwrap()
}

fn summary_of(engine: &Engine, job_id: JobId) -> ste_types::JobProgressSummary {
    match engine.list(&ListJobPartsTransfers {
        job_id: Some(job_id),
        expected_transfer_status: TransferStatus::Any,
    }) {
        Ok(ListResponse::Summary(summary)) => summary,
        other => panic!("expected a summary, got {other:?}"),
    }
}

#[tokio::test]
async fn single_file_upload_chunks_and_commits() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    let (source, contents) = write_source(tempdir.path(), "a.bin", 10);
    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![local_transfer(&source, 10, "a.bin")],
        Default::default(),
    );
    engine.submit(&order).unwrap();

    let destination = format!("{CONTAINER}/a.bin");
    wait_for("blob commit", || client.committed(&destination).is_some()).await;

    // 3 staged blocks of 4 + 4 + 2 bytes, committed with one block list.
    assert_eq!(client.put_block_calls(), 3);
    assert_eq!(client.put_block_list_calls(), 1);
    assert_eq!(client.put_blob_calls(), 0);

    let blob = client.committed(&destination).unwrap();
    assert_eq!(blob.data, contents);
    let block_ids = blob.block_ids.unwrap();
    assert_eq!(block_ids.len(), 3);

    // Each id decodes to 16 bytes, all distinct, in chunk order as staged
    // by the prologue.
    let plan = PlanHandle::open(&plan_path(engine.state_dir(), job_id, PartNumber(0))).unwrap();
    for (chunk_idx, block_id) in block_ids.iter().enumerate() {
        let raw = BASE64.decode(block_id).unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(raw, plan.chunk_block_id(0, chunk_idx as u32).unwrap());
        assert_eq!(plan.chunk_status(0, chunk_idx as u32).unwrap(), ChunkStatus::Complete);
    }
    let mut deduped = block_ids.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), 3);

    assert_eq!(plan.transfer_status(0).unwrap(), TransferStatus::Complete);
    assert_ne!(plan.completion_time(0).unwrap(), 0);

    let summary = summary_of(&engine, job_id);
    assert_eq!(summary.total_number_of_transfers, 1);
    assert_eq!(summary.total_number_of_transfers_completed, 1);
    assert_eq!(summary.job_status, JobStatus::Completed);
    assert_eq!(summary.percentage_progress, 100);
}

#[tokio::test]
async fn small_file_uses_the_put_blob_fast_path() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4 * 1024 * 1024).await;

    let (source, contents) = write_source(tempdir.path(), "small.bin", 1024);
    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![local_transfer(&source, 1024, "small.bin")],
        Default::default(),
    );
    engine.submit(&order).unwrap();

    let destination = format!("{CONTAINER}/small.bin");
    wait_for("blob commit", || client.committed(&destination).is_some()).await;

    assert_eq!(client.put_block_calls(), 0);
    assert_eq!(client.put_blob_calls(), 1);
    let blob = client.committed(&destination).unwrap();
    assert_eq!(blob.data, contents);
    assert!(blob.block_ids.is_none());

    let plan = PlanHandle::open(&plan_path(engine.state_dir(), job_id, PartNumber(0))).unwrap();
    assert_eq!(plan.transfer(0).unwrap().chunk_count.get(), 1);
    assert_eq!(plan.chunk_status(0, 0).unwrap(), ChunkStatus::Complete);
    assert_eq!(plan.transfer_status(0).unwrap(), TransferStatus::Complete);
}

#[tokio::test]
async fn zero_byte_file_completes_through_the_fast_path() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    let (source, _) = write_source(tempdir.path(), "empty.bin", 0);
    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![local_transfer(&source, 0, "empty.bin")],
        Default::default(),
    );
    engine.submit(&order).unwrap();

    let destination = format!("{CONTAINER}/empty.bin");
    wait_for("blob commit", || client.committed(&destination).is_some()).await;

    assert_eq!(client.put_blob_calls(), 1);
    assert_eq!(client.put_block_calls(), 0);
    assert!(client.committed(&destination).unwrap().data.is_empty());

    let plan = PlanHandle::open(&plan_path(engine.state_dir(), job_id, PartNumber(0))).unwrap();
    assert_eq!(plan.transfer(0).unwrap().chunk_count.get(), 1);
    assert_eq!(plan.transfer_status(0).unwrap(), TransferStatus::Complete);
}

#[tokio::test]
async fn block_size_boundaries() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    // exactly one block: fast path
    let (exact, _) = write_source(tempdir.path(), "exact.bin", 4);
    // one byte more: two chunks and a block list
    let (plus_one, plus_one_contents) = write_source(tempdir.path(), "plus-one.bin", 5);
    // exact multiple: last chunk is a full block
    let (multiple, multiple_contents) = write_source(tempdir.path(), "multiple.bin", 8);

    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![
            local_transfer(&exact, 4, "exact.bin"),
            local_transfer(&plus_one, 5, "plus-one.bin"),
            local_transfer(&multiple, 8, "multiple.bin"),
        ],
        Default::default(),
    );
    engine.submit(&order).unwrap();

    wait_for("all blobs committed", || {
        ["exact.bin", "plus-one.bin", "multiple.bin"]
            .iter()
            .all(|name| client.committed(&format!("{CONTAINER}/{name}")).is_some())
    })
    .await;

    // exact.bin: put blob; plus-one.bin: 2 blocks; multiple.bin: 2 blocks
    assert_eq!(client.put_blob_calls(), 1);
    assert_eq!(client.put_block_calls(), 4);
    assert_eq!(client.put_block_list_calls(), 2);

    let plus_one_blob = client.committed(&format!("{CONTAINER}/plus-one.bin")).unwrap();
    assert_eq!(plus_one_blob.data, plus_one_contents);
    assert_eq!(plus_one_blob.block_ids.unwrap().len(), 2);

    let multiple_blob = client.committed(&format!("{CONTAINER}/multiple.bin")).unwrap();
    assert_eq!(multiple_blob.data, multiple_contents);

    let plan = PlanHandle::open(&plan_path(engine.state_dir(), job_id, PartNumber(0))).unwrap();
    assert_eq!(plan.transfer(0).unwrap().chunk_count.get(), 1);
    assert_eq!(plan.transfer(1).unwrap().chunk_count.get(), 2);
    assert_eq!(plan.transfer(2).unwrap().chunk_count.get(), 2);
}

#[tokio::test]
async fn failed_chunk_fails_the_transfer_without_committing() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    // 8 chunks; the 4th put-block fails.
    let (source, _) = write_source(tempdir.path(), "big.bin", 32);
    client.fail_put_block_at(4);

    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![local_transfer(&source, 32, "big.bin")],
        Default::default(),
    );
    engine.submit(&order).unwrap();

    wait_for("transfer to fail", || {
        transfer_status(&engine, job_id, 0, 0) == TransferStatus::Failed
    })
    .await;
    // Every chunk slot turns terminal once its closure has run, which is
    // the point where no further remote calls can happen.
    wait_for("all chunk closures to finish", || {
        let plan = PlanHandle::open(&plan_path(engine.state_dir(), job_id, PartNumber(0))).unwrap();
        (0..8).all(|chunk| {
            matches!(
                plan.chunk_status(0, chunk).unwrap(),
                ChunkStatus::Complete | ChunkStatus::Failed
            )
        })
    })
    .await;

    assert!(client.put_block_calls() <= 8);
    assert_eq!(client.put_block_list_calls(), 0);
    assert!(client.committed(&format!("{CONTAINER}/big.bin")).is_none());

    match engine.list(&ListJobPartsTransfers {
        job_id: Some(job_id),
        expected_transfer_status: TransferStatus::Failed,
    }) {
        Ok(ListResponse::Transfers(transfers)) => {
            assert_eq!(transfers.details.len(), 1);
            assert_eq!(transfers.details[0].src, source);
        }
        other => panic!("expected transfer details, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_mid_transfer_leaves_no_committed_blob() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    let (source, _) = write_source(tempdir.path(), "big.bin", 32);
    // Let 3 put-blocks through, hold the rest open.
    client.hold_put_blocks_after(3);

    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![local_transfer(&source, 32, "big.bin")],
        Default::default(),
    );
    engine.submit(&order).unwrap();

    let destination = format!("{CONTAINER}/big.bin");
    wait_for("first blocks staged", || client.staged_block_count(&destination) >= 3).await;

    engine.cancel(job_id).unwrap();
    client.release_put_blocks();

    wait_for("transfer marked failed", || {
        transfer_status(&engine, job_id, 0, 0) == TransferStatus::Failed
    })
    .await;

    assert!(client.put_block_calls() <= 8);
    assert_eq!(client.put_block_list_calls(), 0);
    assert!(client.committed(&destination).is_none());

    let summary = summary_of(&engine, job_id);
    assert_eq!(summary.total_number_of_transfers_failed, 1);
    assert_eq!(summary.failed_transfers.len(), 1);
}

#[tokio::test]
async fn directory_upload_across_parts_rolls_up() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    // 5 files split 2/2/1 across parts, the last part final.
    let job_id = JobId::new_random();
    let mut names = Vec::new();
    for part in 0..3u32 {
        let count = if part == 2 { 1 } else { 2 };
        let mut transfers = Vec::new();
        for i in 0..count {
            let name = format!("f{part}-{i}.bin");
            let (source, _) = write_source(tempdir.path(), &name, 6);
            transfers.push(local_transfer(&source, 6, &name));
            names.push(name);
        }
        let order = upload_order(job_id, part, part == 2, transfers, Default::default());
        engine.submit(&order).unwrap();
    }

    wait_for("all five blobs committed", || {
        names
            .iter()
            .all(|name| client.committed(&format!("{CONTAINER}/{name}")).is_some())
    })
    .await;

    let summary = summary_of(&engine, job_id);
    assert!(summary.complete_job_ordered);
    assert_eq!(summary.total_number_of_transfers, 5);
    assert_eq!(summary.total_number_of_transfers_completed, 5);
    assert_eq!(summary.job_status, JobStatus::Completed);
}

#[tokio::test]
async fn resume_skips_terminal_transfers() {
    let tempdir = tempfile::tempdir().unwrap();
    let state_dir = tempdir.path().join("state");
    std::fs::create_dir_all(&state_dir).unwrap();

    let (done_source, _) = write_source(tempdir.path(), "done.bin", 6);
    let (todo_source, todo_contents) = write_source(tempdir.path(), "todo.bin", 6);

    // Craft the plan of a crashed run: one transfer already complete, one
    // still in progress.
    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![
            local_transfer(&done_source, 6, "done.bin"),
            local_transfer(&todo_source, 6, "todo.bin"),
        ],
        Default::default(),
    );
    {
        let plan =
            PlanHandle::create(&plan_path(&state_dir, job_id, PartNumber(0)), &order, 4, 3600)
                .unwrap();
        plan.set_transfer_status(0, TransferStatus::Complete).unwrap();
    }

    // Restart: the engine re-registers the plan but does not re-enqueue.
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&state_dir, &client, 4).await;
    let summary = summary_of(&engine, job_id);
    assert_eq!(summary.total_number_of_transfers, 2);
    assert_eq!(summary.total_number_of_transfers_completed, 1);
    assert_eq!(client.put_block_calls(), 0);

    engine.resume(job_id).unwrap();

    let destination = format!("{CONTAINER}/todo.bin");
    wait_for("resumed transfer to finish", || {
        client.committed(&destination).is_some()
    })
    .await;
    assert_eq!(client.committed(&destination).unwrap().data, todo_contents);
    // The completed transfer was skipped entirely.
    assert!(client.committed(&format!("{CONTAINER}/done.bin")).is_none());

    let summary = summary_of(&engine, job_id);
    assert_eq!(summary.total_number_of_transfers_completed, 2);
    assert_eq!(summary.job_status, JobStatus::Completed);
}

#[tokio::test]
async fn list_filters_by_transfer_status() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    let (ok_a, _) = write_source(tempdir.path(), "ok-a.bin", 3);
    let (ok_b, _) = write_source(tempdir.path(), "ok-b.bin", 3);
    let missing = tempdir.path().join("missing.bin").to_string_lossy().into_owned();
    let (held, _) = write_source(tempdir.path(), "held.bin", 8);

    // Hold every put-block: the chunked transfer stays in progress.
    client.hold_put_blocks_after(0);

    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![
            local_transfer(&ok_a, 3, "ok-a.bin"),
            local_transfer(&ok_b, 3, "ok-b.bin"),
            local_transfer(&missing, 3, "missing.bin"),
            local_transfer(&held, 8, "held.bin"),
        ],
        Default::default(),
    );
    engine.submit(&order).unwrap();

    wait_for("two completions and one failure", || {
        transfer_status(&engine, job_id, 0, 0) == TransferStatus::Complete
            && transfer_status(&engine, job_id, 0, 1) == TransferStatus::Complete
            && transfer_status(&engine, job_id, 0, 2) == TransferStatus::Failed
    })
    .await;
    assert_eq!(transfer_status(&engine, job_id, 0, 3), TransferStatus::InProgress);

    match engine.list(&ListJobPartsTransfers {
        job_id: Some(job_id),
        expected_transfer_status: TransferStatus::Failed,
    }) {
        Ok(ListResponse::Transfers(transfers)) => {
            assert_eq!(transfers.details.len(), 1);
            assert_eq!(transfers.details[0].src, missing);
            assert_eq!(transfers.details[0].dst, format!("{CONTAINER}/missing.bin"));
        }
        other => panic!("expected transfer details, got {other:?}"),
    }

    let summary = summary_of(&engine, job_id);
    assert_eq!(summary.job_status, JobStatus::InProgress);
    assert_eq!(summary.percentage_progress, 75);

    client.release_put_blocks();
}

#[tokio::test]
async fn upload_then_download_roundtrips_bit_identically() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    let (source, contents) = write_source(tempdir.path(), "roundtrip.bin", 10);
    let upload_job = JobId::new_random();
    engine
        .submit(&upload_order(
            upload_job,
            0,
            true,
            vec![local_transfer(&source, 10, "roundtrip.bin")],
            Default::default(),
        ))
        .unwrap();

    let blob_url = format!("{CONTAINER}/roundtrip.bin");
    wait_for("upload to commit", || client.committed(&blob_url).is_some()).await;

    let download_dest = tempdir.path().join("downloaded.bin").to_string_lossy().into_owned();
    let download_job = JobId::new_random();
    let order = CopyJobPartOrder {
        version: 1,
        job_id: download_job,
        part_num: PartNumber(0),
        is_final_part: true,
        priority: Priority::High,
        source_type: Location::Blob,
        destination_type: Location::Local,
        transfers: vec![CopyTransfer {
            source: blob_url.clone(),
            destination: download_dest.clone(),
            last_modified: Utc::now(),
            source_size: 10,
        }],
        log_verbosity: 5,
        is_background: false,
        optional_attributes: Default::default(),
    };
    engine.submit(&order).unwrap();

    wait_for("download to finish", || {
        transfer_status(&engine, download_job, 0, 0) == TransferStatus::Complete
    })
    .await;

    assert_eq!(client.get_range_calls(), 3);
    let downloaded = std::fs::read(&download_dest).unwrap();
    assert_eq!(Sha256::digest(&downloaded), Sha256::digest(&contents));
}

#[tokio::test]
async fn download_restores_the_modification_time() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    let last_modified = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
    let blob_url = format!("{CONTAINER}/stamped.bin");
    client.seed_blob(&blob_url, b"stamped contents", last_modified);

    let destination = tempdir.path().join("stamped.bin").to_string_lossy().into_owned();
    let job_id = JobId::new_random();
    let order = CopyJobPartOrder {
        version: 1,
        job_id,
        part_num: PartNumber(0),
        is_final_part: true,
        priority: Priority::High,
        source_type: Location::Blob,
        destination_type: Location::Local,
        transfers: vec![CopyTransfer {
            source: blob_url,
            destination: destination.clone(),
            last_modified,
            source_size: 16,
        }],
        log_verbosity: 5,
        is_background: false,
        optional_attributes: BlobTransferAttributes {
            preserve_last_modified: true,
            ..Default::default()
        },
    };
    engine.submit(&order).unwrap();

    wait_for("download to finish", || {
        transfer_status(&engine, job_id, 0, 0) == TransferStatus::Complete
    })
    .await;

    assert_eq!(std::fs::read(&destination).unwrap(), b"stamped contents");
    let modified = std::fs::metadata(&destination).unwrap().modified().unwrap();
    assert_eq!(modified, std::time::SystemTime::from(last_modified));
}

#[tokio::test]
async fn existing_destination_is_skipped_without_io() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    let blob_url = format!("{CONTAINER}/taken.bin");
    client.seed_blob(&blob_url, b"already here", Utc::now());

    let (source, _) = write_source(tempdir.path(), "taken.bin", 6);
    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![local_transfer(&source, 6, "taken.bin")],
        BlobTransferAttributes {
            force_write: false,
            ..Default::default()
        },
    );
    engine.submit(&order).unwrap();

    wait_for("transfer to be skipped", || {
        transfer_status(&engine, job_id, 0, 0) == TransferStatus::FileAlreadyExists
    })
    .await;

    assert_eq!(client.put_block_calls(), 0);
    assert_eq!(client.put_blob_calls(), 0);
    assert_eq!(client.committed(&blob_url).unwrap().data.as_ref(), b"already here");
}

#[tokio::test]
async fn mutated_source_fails_before_any_io() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    let (source, _) = write_source(tempdir.path(), "shrunk.bin", 6);
    let job_id = JobId::new_random();
    // The order claims 7 bytes, the file has 6.
    let order = upload_order(
        job_id,
        0,
        true,
        vec![local_transfer(&source, 7, "shrunk.bin")],
        Default::default(),
    );
    engine.submit(&order).unwrap();

    wait_for("transfer to fail", || {
        transfer_status(&engine, job_id, 0, 0) == TransferStatus::Failed
    })
    .await;
    assert_eq!(client.put_block_calls(), 0);
    assert_eq!(client.put_blob_calls(), 0);
}

#[tokio::test]
async fn duplicate_parts_and_unknown_jobs_are_rejected() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();
    let engine = spawn_engine(&tempdir.path().join("state"), &client, 4).await;

    let (source, _) = write_source(tempdir.path(), "a.bin", 3);
    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![local_transfer(&source, 3, "a.bin")],
        Default::default(),
    );
    engine.submit(&order).unwrap();
    assert!(matches!(
        engine.submit(&order),
        Err(EngineError::DuplicatePart(_, _))
    ));

    let unknown = JobId::new_random();
    assert!(matches!(engine.cancel(unknown), Err(EngineError::UnknownJob(_))));
    assert!(matches!(engine.resume(unknown), Err(EngineError::UnknownJob(_))));
    assert!(matches!(
        engine.list(&ListJobPartsTransfers {
            job_id: Some(unknown),
            expected_transfer_status: TransferStatus::Any,
        }),
        Err(EngineError::UnknownJob(_))
    ));
}

#[tokio::test]
async fn janitor_deletes_expired_plans() {
    let tempdir = tempfile::tempdir().unwrap();
    let client = InMemoryBlobClient::new();

    let mut config = EngineConfig::new(tempdir.path().join("state"));
    config.block_size = 4;
    config.workers = 2;
    config.plan_ttl = Duration::ZERO;
    config.janitor_interval = Duration::from_millis(20);
    let engine = Engine::spawn(config, Arc::new(client.clone())).await.unwrap();

    let (source, _) = write_source(tempdir.path(), "a.bin", 3);
    let job_id = JobId::new_random();
    let order = upload_order(
        job_id,
        0,
        true,
        vec![local_transfer(&source, 3, "a.bin")],
        Default::default(),
    );
    engine.submit(&order).unwrap();

    let plan_file = plan_path(engine.state_dir(), job_id, PartNumber(0));
    wait_for("plan file to be cleaned up", || !plan_file.exists()).await;
    assert!(matches!(
        engine.list(&ListJobPartsTransfers {
            job_id: Some(job_id),
            expected_transfer_status: TransferStatus::Any,
        }),
        Err(EngineError::UnknownJob(_))
    ));
}
