//! The storage transfer engine.
//!
//! The engine ingests [`CopyJobPartOrder`]s, persists each part to a
//! memory-mapped plan file, and drives the transfers to completion through
//! a prioritized two-level pipeline: dispatchers run per-transfer
//! prologues, which fan chunk operations out to a worker pool. The plan
//! files are the durable source of truth and survive process restarts,
//! which is what makes jobs resumable.
//!
//! It is designed as a library crate to be used by the control-plane
//! server.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod blob;
pub mod datamodel;
mod error;
mod janitor;
pub mod plan;
mod queue;
mod registry;
mod scheduler;
mod throughput;
mod xfer;

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use ste_types::{
    CopyJobPartOrder, ExistingJobDetails, JobId, JobProgressSummary, JobStatus,
    ListJobPartsTransfers, Location, PartNumber, Priority, TransferDetail, TransferStatus,
    TransfersDetail,
};
use tokio::sync::mpsc;

use crate::blob::SharedBlobClient;
use crate::datamodel::PLAN_FILE_EXTENSION;
use crate::plan::{PlanHandle, plan_path};
use crate::queue::ChunkQueues;
use crate::registry::{PartEntry, PlanRegistry};
use crate::scheduler::TransferMsg;
use crate::throughput::Throughput;

pub use crate::error::EngineError;

/// The chunk size the engine picks for orders that leave it to the engine.
pub const DEFAULT_ENGINE_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Configuration of an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the plan files.
    pub state_dir: PathBuf,
    /// Chunk size applied to orders whose `block_size_bytes` is 0.
    pub block_size: u64,
    /// Initial size of the chunk worker pool.
    pub workers: usize,
    /// Capacity of each priority's chunk queue; a full queue blocks the
    /// dispatching prologue.
    pub chunk_queue_capacity: usize,
    /// How long terminal plans are kept before the janitor deletes them.
    pub plan_ttl: Duration,
    /// How often the janitor looks for expired plans.
    pub janitor_interval: Duration,
}

impl EngineConfig {
    /// Creates a configuration with defaults for everything but the state
    /// directory.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            block_size: DEFAULT_ENGINE_BLOCK_SIZE,
            workers: scheduler::default_worker_count(),
            chunk_queue_capacity: 1000,
            plan_ttl: Duration::from_secs(24 * 60 * 60),
            janitor_interval: Duration::from_secs(30),
        }
    }
}

/// The engine's answer to a `list` request.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ListResponse {
    /// All registered jobs; answers requests without a job id.
    Jobs(ExistingJobDetails),
    /// Progress roll-up of one job; answers the `Any` status filter.
    Summary(JobProgressSummary),
    /// Transfers of one job matching a concrete status filter.
    Transfers(TransfersDetail),
}

#[derive(Debug)]
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) client: SharedBlobClient,
    pub(crate) registry: PlanRegistry,
    pub(crate) transfer_txs: [mpsc::UnboundedSender<TransferMsg>; 3],
    pub(crate) chunks: Arc<ChunkQueues>,
    pub(crate) throughput: Throughput,
}

/// The storage transfer engine.
///
/// Cheap to clone; all clones share the same scheduler, registry and
/// accounting state.
#[derive(Debug, Clone)]
pub struct Engine(Arc<EngineInner>);

impl Engine {
    /// Starts the engine: creates the state directory, re-registers any
    /// plan files found there, and spawns dispatchers, workers and the
    /// janitor onto the current runtime.
    pub async fn spawn(
        config: EngineConfig,
        client: SharedBlobClient,
    ) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.state_dir)?;

        let chunks = Arc::new(ChunkQueues::new(config.chunk_queue_capacity));
        let (high_tx, high_rx) = mpsc::unbounded_channel();
        let (med_tx, med_rx) = mpsc::unbounded_channel();
        let (low_tx, low_rx) = mpsc::unbounded_channel();

        let workers = config.workers;
        let janitor_interval = config.janitor_interval;
        let inner = Arc::new(EngineInner {
            config,
            client,
            registry: PlanRegistry::new(),
            transfer_txs: [high_tx, med_tx, low_tx],
            chunks: Arc::clone(&chunks),
            throughput: Throughput::new(),
        });

        let reloaded = reload_plans(&inner);
        if reloaded > 0 {
            tracing::info!(plans = reloaded, "re-registered existing plan files");
        }

        scheduler::spawn_workers(&chunks, workers);
        for (priority, rx) in [
            (Priority::High, high_rx),
            (Priority::Medium, med_rx),
            (Priority::Low, low_rx),
        ] {
            tokio::spawn(dispatch_loop(Arc::clone(&inner), priority, rx));
        }
        tokio::spawn(janitor::run(Arc::clone(&inner), janitor_interval));

        tracing::info!(
            workers,
            state_dir = %inner.config.state_dir.display(),
            "storage transfer engine started"
        );
        Ok(Self(inner))
    }

    /// The directory holding the plan files.
    pub fn state_dir(&self) -> &Path {
        &self.0.config.state_dir
    }

    /// Accepts a job part order: materializes its plan file and enqueues
    /// every transfer at the order's priority.
    pub fn submit(&self, order: &CopyJobPartOrder) -> Result<(), EngineError> {
        if order.source_type == Location::Unknown || order.destination_type == Location::Unknown {
            return Err(EngineError::InvalidOrder(
                "source and destination kinds must be known".into(),
            ));
        }
        if self.0.registry.contains(order.job_id, order.part_num) {
            return Err(EngineError::DuplicatePart(order.job_id, order.part_num));
        }

        let attrs = &order.optional_attributes;
        let block_size = if attrs.block_size_bytes == 0 {
            self.0.config.block_size
        } else {
            attrs.block_size_bytes
        };
        let ttl = self.0.config.plan_ttl.as_secs().min(u32::MAX.into()) as u32;

        let path = plan_path(&self.0.config.state_dir, order.job_id, order.part_num);
        let plan = PlanHandle::create(&path, order, block_size, ttl)?;
        let entry = PartEntry::new(plan, attrs.clone());
        if !self.0.registry.insert(Arc::clone(&entry)) {
            let _ = entry.plan.remove_file();
            return Err(EngineError::DuplicatePart(order.job_id, order.part_num));
        }

        tracing::info!(
            job_id = %order.job_id,
            part = %order.part_num,
            transfers = order.transfers.len(),
            priority = ?order.priority,
            is_final_part = order.is_final_part,
            "job part order accepted"
        );
        self.enqueue_part(&entry, false);
        Ok(())
    }

    /// Trips the cancellation token of every transfer of a job.
    ///
    /// Fire and forget: in-flight chunks abandon their I/O at the next
    /// boundary and the last observer finalizes each transfer as `Failed`;
    /// poll `list` to see the terminal states.
    pub fn cancel(&self, job_id: JobId) -> Result<(), EngineError> {
        let parts = self.parts_or_unknown(job_id)?;
        for (_, entry) in &parts {
            entry.cancel_all();
        }
        tracing::info!(job_id = %job_id, parts = parts.len(), "cancel requested");
        Ok(())
    }

    /// Pauses a job.
    ///
    /// Today this trips the same cancellation tokens as [`cancel`]
    /// (transfers finalize as `Failed` and can be picked up again with
    /// [`resume`]); it is a separate verb so the two can diverge.
    ///
    /// [`cancel`]: Self::cancel
    /// [`resume`]: Self::resume
    pub fn pause(&self, job_id: JobId) -> Result<(), EngineError> {
        let parts = self.parts_or_unknown(job_id)?;
        for (_, entry) in &parts {
            entry.cancel_all();
        }
        tracing::info!(job_id = %job_id, parts = parts.len(), "pause requested");
        Ok(())
    }

    /// Re-enqueues every non-terminal transfer of a job with fresh
    /// cancellation tokens and chunk counters.
    ///
    /// Terminal transfers are skipped, so a job resumed after a crash or a
    /// pause only redoes the unfinished work.
    pub fn resume(&self, job_id: JobId) -> Result<(), EngineError> {
        let parts = self.parts_or_unknown(job_id)?;
        let mut resumed = 0;
        for (_, entry) in parts {
            let fresh = entry.resumed();
            self.0.registry.replace(Arc::clone(&fresh));
            resumed += self.enqueue_part(&fresh, true);
        }
        tracing::info!(job_id = %job_id, transfers = resumed, "resume requested");
        Ok(())
    }

    /// Answers a `list` request; see [`ListResponse`] for the shapes.
    pub fn list(&self, request: &ListJobPartsTransfers) -> Result<ListResponse, EngineError> {
        let Some(job_id) = request.job_id else {
            return Ok(ListResponse::Jobs(ExistingJobDetails {
                job_ids: self.0.registry.jobs(),
            }));
        };

        let parts = self.parts_or_unknown(job_id)?;
        if request.expected_transfer_status == TransferStatus::Any {
            Ok(ListResponse::Summary(self.summary(&parts)))
        } else {
            Ok(ListResponse::Transfers(transfers_with_status(
                &parts,
                request.expected_transfer_status,
            )))
        }
    }

    /// Shrinks the worker pool by making `count` workers exit after their
    /// current chunk.
    pub fn retire_workers(&self, count: usize) {
        for _ in 0..count {
            self.0.chunks.kill_one();
        }
        tracing::info!(count, "worker pool shrink requested");
    }

    fn parts_or_unknown(
        &self,
        job_id: JobId,
    ) -> Result<Vec<(PartNumber, Arc<PartEntry>)>, EngineError> {
        let parts = self.0.registry.parts_of(job_id);
        if parts.is_empty() {
            return Err(EngineError::UnknownJob(job_id));
        }
        Ok(parts)
    }

    /// Sends one transfer message per (optionally non-terminal) transfer.
    fn enqueue_part(&self, entry: &PartEntry, only_non_terminal: bool) -> usize {
        let plan = &entry.plan;
        let priority = plan.priority();
        let tx = &self.0.transfer_txs[u8::from(priority) as usize];

        let mut sent = 0;
        for transfer_idx in 0..plan.num_transfers() {
            if only_non_terminal
                && plan
                    .transfer_status(transfer_idx)
                    .map(|status| status.is_terminal())
                    .unwrap_or(false)
            {
                continue;
            }
            let msg = TransferMsg {
                job_id: plan.job_id(),
                part_num: plan.part_num(),
                transfer_idx,
            };
            if tx.send(msg).is_err() {
                tracing::error!("transfer dispatcher is gone");
                return sent;
            }
            sent += 1;
        }
        sent
    }

    fn summary(&self, parts: &[(PartNumber, Arc<PartEntry>)]) -> JobProgressSummary {
        let mut total = 0u32;
        let mut completed = 0u32;
        let mut failed = 0u32;
        let mut failed_transfers = Vec::new();
        let mut has_final_part = false;
        let mut max_part = 0u32;

        for (part_num, entry) in parts {
            let plan = &entry.plan;
            has_final_part |= plan.is_final_part();
            max_part = max_part.max(part_num.0);

            for transfer_idx in 0..plan.num_transfers() {
                total += 1;
                match plan.transfer_status(transfer_idx) {
                    Ok(TransferStatus::Complete) => completed += 1,
                    Ok(status @ (TransferStatus::Failed | TransferStatus::FileAlreadyExists)) => {
                        failed += 1;
                        failed_transfers.push(TransferDetail {
                            src: plan.source(transfer_idx).unwrap_or_default().to_owned(),
                            dst: plan.destination(transfer_idx).unwrap_or_default().to_owned(),
                            transfer_status: status,
                        });
                    }
                    _ => {}
                }
            }
        }

        let complete_job_ordered = has_final_part && parts.len() as u32 == max_part + 1;
        let terminal = completed + failed;
        let percentage_progress = if total == 0 { 100 } else { terminal * 100 / total };
        let job_status = if !complete_job_ordered || terminal < total {
            JobStatus::InProgress
        } else if failed > 0 {
            JobStatus::CompletedWithErrors
        } else {
            JobStatus::Completed
        };

        JobProgressSummary {
            complete_job_ordered,
            job_status,
            total_number_of_transfers: total,
            total_number_of_transfers_completed: completed,
            total_number_of_transfers_failed: failed,
            percentage_progress,
            failed_transfers,
            throughput_in_bytes_per_seconds: self.0.throughput.bytes_per_second(),
        }
    }
}

fn transfers_with_status(
    parts: &[(PartNumber, Arc<PartEntry>)],
    expected: TransferStatus,
) -> TransfersDetail {
    let mut details = Vec::new();
    for (_, entry) in parts {
        let plan = &entry.plan;
        for transfer_idx in 0..plan.num_transfers() {
            let Ok(status) = plan.transfer_status(transfer_idx) else {
                continue;
            };
            if expected.matches(status) {
                details.push(TransferDetail {
                    src: plan.source(transfer_idx).unwrap_or_default().to_owned(),
                    dst: plan.destination(transfer_idx).unwrap_or_default().to_owned(),
                    transfer_status: status,
                });
            }
        }
    }
    TransfersDetail { details }
}

/// Scans the state directory and registers every readable plan file.
///
/// Plans are only registered, never re-enqueued; `resume` decides what runs
/// again.
fn reload_plans(inner: &EngineInner) -> usize {
    let entries = match std::fs::read_dir(&inner.config.state_dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(error = %err, "cannot scan state directory");
            return 0;
        }
    };

    let mut count = 0;
    for dir_entry in entries.flatten() {
        let path = dir_entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(PLAN_FILE_EXTENSION) {
            continue;
        }
        match PlanHandle::open(&path) {
            Ok(plan) => {
                if inner.registry.insert(PartEntry::from_plan(plan)) {
                    count += 1;
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable plan file");
            }
        }
    }
    count
}

async fn dispatch_loop(
    inner: Arc<EngineInner>,
    priority: Priority,
    mut rx: mpsc::UnboundedReceiver<TransferMsg>,
) {
    tracing::debug!(?priority, "transfer dispatcher started");
    while let Some(msg) = rx.recv().await {
        let prologue = xfer::execute(&inner, msg);
        // A panic in a prologue fails that single transfer; the dispatcher
        // itself keeps draining its queue.
        if AssertUnwindSafe(prologue).catch_unwind().await.is_err() {
            tracing::error!(
                job_id = %msg.job_id,
                part = %msg.part_num,
                transfer = msg.transfer_idx,
                "transfer prologue panicked"
            );
            if let Some(entry) = inner.registry.get(msg.job_id, msg.part_num) {
                let _ = entry
                    .plan
                    .set_transfer_status(msg.transfer_idx, TransferStatus::Failed);
            }
        }
    }
}
