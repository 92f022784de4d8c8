//! The worker pool draining the chunk queues.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use ste_types::{JobId, PartNumber};

use crate::queue::{ChunkQueues, WorkerMsg};

/// A transfer handed from the control plane to a dispatcher.
///
/// Carries indices only; the dispatcher and the chunk functions look the
/// plan handle up in the registry when they need it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferMsg {
    pub job_id: JobId,
    pub part_num: PartNumber,
    pub transfer_idx: u32,
}

/// The initial size of the worker pool.
///
/// The pool can only shrink afterwards, via suicide notes; dynamic growth
/// is out of scope.
pub(crate) fn default_worker_count() -> usize {
    (4 * num_cpus::get()).min(8)
}

/// Spawns `count` workers onto the runtime.
pub(crate) fn spawn_workers(queues: &Arc<ChunkQueues>, count: usize) {
    for worker_id in 0..count {
        tokio::spawn(worker_loop(worker_id, Arc::clone(queues)));
    }
}

async fn worker_loop(worker_id: usize, queues: Arc<ChunkQueues>) {
    tracing::debug!(worker = worker_id, "worker started");
    loop {
        match queues.next().await {
            WorkerMsg::Chunk(msg) => {
                let work = (msg.do_transfer)(worker_id);
                // A panicking chunk function must not take the worker down
                // with it; the transfer it belongs to has already been
                // failed through its cancellation token.
                if AssertUnwindSafe(work).catch_unwind().await.is_err() {
                    tracing::error!(worker = worker_id, "chunk function panicked");
                }
            }
            WorkerMsg::Suicide => {
                tracing::debug!(worker = worker_id, "worker retired");
                return;
            }
        }
    }
}
