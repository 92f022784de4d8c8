//! The process-wide map of mapped job part plans.
//!
//! Chunk closures never hold references into other transfers; they carry
//! `(JobId, PartNumber, transfer index)` as plain data and look the handle
//! up here when they need to write. The map itself is read-mostly and
//! guarded by a single mutex; all mutation of plan bytes is lock-free.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use ste_types::{BlobTransferAttributes, JobId, PartNumber};
use tokio_util::sync::CancellationToken;

use crate::plan::PlanHandle;

/// Per-transfer runtime state shared by all workers of one transfer.
#[derive(Debug)]
pub struct TransferState {
    /// Tripped to make pending and in-flight chunk operations bail out.
    pub cancel: CancellationToken,
    /// Total chunks of this transfer, from the plan's chunk count.
    pub num_chunks: u32,
    chunks_done: AtomicU32,
}

impl TransferState {
    fn new(num_chunks: u32) -> Arc<Self> {
        Arc::new(Self {
            cancel: CancellationToken::new(),
            num_chunks,
            chunks_done: AtomicU32::new(0),
        })
    }

    /// Counts one chunk as done and returns the new total.
    ///
    /// The release/acquire pair on this counter is what publishes each
    /// chunk's writes (block ids, slot statuses) to the worker that ends up
    /// running the epilogue.
    pub fn complete_chunk(&self) -> u32 {
        self.chunks_done.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The number of chunks that have finished, successfully or not.
    pub fn chunks_done(&self) -> u32 {
        self.chunks_done.load(Ordering::Acquire)
    }
}

/// A registered job part: the mapped plan plus its runtime state.
#[derive(Debug)]
pub struct PartEntry {
    /// The mapped plan file.
    pub plan: Arc<PlanHandle>,
    /// Attributes applying to every transfer of the part.
    pub attributes: BlobTransferAttributes,
    /// Runtime state per transfer, indexed like the plan's records.
    pub transfers: Vec<Arc<TransferState>>,
}

impl PartEntry {
    /// Builds the runtime state for a freshly created plan.
    pub fn new(plan: PlanHandle, attributes: BlobTransferAttributes) -> Arc<Self> {
        Self::with_plan(Arc::new(plan), attributes)
    }

    /// Rebuilds the runtime state for a plan reloaded from disk.
    ///
    /// Attributes that are not persisted in the plan (overwrite and mtime
    /// behavior, mime sniffing) revert to their defaults.
    pub fn from_plan(plan: PlanHandle) -> Arc<Self> {
        let blob_data = &plan.header().blob_data;
        let attributes = BlobTransferAttributes {
            content_type: String::from_utf8_lossy(blob_data.content_type()).into_owned(),
            content_encoding: String::from_utf8_lossy(blob_data.content_encoding()).into_owned(),
            metadata: String::from_utf8_lossy(blob_data.metadata()).into_owned(),
            block_size_bytes: blob_data.block_size.get(),
            ..Default::default()
        };
        Self::with_plan(Arc::new(plan), attributes)
    }

    /// Clones an entry with fresh cancellation tokens and zeroed chunk
    /// counters, for re-enqueueing a part on `resume`.
    pub fn resumed(&self) -> Arc<Self> {
        Self::with_plan(Arc::clone(&self.plan), self.attributes.clone())
    }

    fn with_plan(plan: Arc<PlanHandle>, attributes: BlobTransferAttributes) -> Arc<Self> {
        let transfers = plan
            .transfers()
            .iter()
            .map(|record| TransferState::new(record.chunk_count.get().into()))
            .collect();
        Arc::new(Self {
            plan,
            attributes,
            transfers,
        })
    }

    /// Trips the cancellation token of every transfer in this part.
    pub fn cancel_all(&self) {
        for state in &self.transfers {
            state.cancel.cancel();
        }
    }
}

/// The map from `(JobId, PartNumber)` to registered part entries.
#[derive(Debug, Default)]
pub struct PlanRegistry {
    inner: Mutex<HashMap<(JobId, PartNumber), Arc<PartEntry>>>,
}

impl PlanRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a part is already registered.
    pub fn contains(&self, job_id: JobId, part_num: PartNumber) -> bool {
        self.inner.lock().unwrap().contains_key(&(job_id, part_num))
    }

    /// Registers a part entry; returns `false` if the slot was taken.
    pub fn insert(&self, entry: Arc<PartEntry>) -> bool {
        let key = (entry.plan.job_id(), entry.plan.part_num());
        let mut map = self.inner.lock().unwrap();
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, entry);
        true
    }

    /// Replaces the entry of an existing part, returning the previous one.
    pub fn replace(&self, entry: Arc<PartEntry>) -> Option<Arc<PartEntry>> {
        let key = (entry.plan.job_id(), entry.plan.part_num());
        self.inner.lock().unwrap().insert(key, entry)
    }

    /// Looks up the entry for a job part.
    pub fn get(&self, job_id: JobId, part_num: PartNumber) -> Option<Arc<PartEntry>> {
        self.inner.lock().unwrap().get(&(job_id, part_num)).cloned()
    }

    /// Removes a part entry.
    pub fn remove(&self, job_id: JobId, part_num: PartNumber) -> Option<Arc<PartEntry>> {
        self.inner.lock().unwrap().remove(&(job_id, part_num))
    }

    /// All distinct jobs with at least one registered part, sorted.
    pub fn jobs(&self) -> Vec<JobId> {
        let map = self.inner.lock().unwrap();
        let mut jobs: Vec<_> = map.keys().map(|(job_id, _)| *job_id).collect();
        jobs.sort();
        jobs.dedup();
        jobs
    }

    /// All parts of one job, sorted by part number.
    pub fn parts_of(&self, job_id: JobId) -> Vec<(PartNumber, Arc<PartEntry>)> {
        let map = self.inner.lock().unwrap();
        let mut parts: Vec<_> = map
            .iter()
            .filter(|((job, _), _)| *job == job_id)
            .map(|((_, part), entry)| (*part, Arc::clone(entry)))
            .collect();
        parts.sort_by_key(|(part, _)| *part);
        parts
    }

    /// A snapshot of every registered part.
    pub fn snapshot(&self) -> Vec<((JobId, PartNumber), Arc<PartEntry>)> {
        let map = self.inner.lock().unwrap();
        map.iter().map(|(key, entry)| (*key, Arc::clone(entry))).collect()
    }
}
