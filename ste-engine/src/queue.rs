//! The chunk queues feeding the worker pool.
//!
//! One bounded queue per priority plus the suicide queue used to shrink the
//! pool. Any worker can pop from any queue, and a full queue blocks the
//! transfer prologue pushing into it, which is the engine's backpressure
//! mechanism. Capacity is tracked with a semaphore and wakeups go through a
//! single notifier shared by all four queues, so a parked worker resumes on
//! whichever queue receives work first.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use ste_types::Priority;
use tokio::sync::{Notify, Semaphore};

/// A single chunk operation, invoked with the id of the executing worker.
pub(crate) type ChunkFn = Box<dyn FnOnce(usize) -> BoxFuture<'static, ()> + Send>;

/// A message on a chunk queue.
pub(crate) struct ChunkMsg {
    pub do_transfer: ChunkFn,
}

impl std::fmt::Debug for ChunkMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkMsg").finish_non_exhaustive()
    }
}

/// What a worker receives from the queues.
#[derive(Debug)]
pub(crate) enum WorkerMsg {
    /// A chunk operation to execute.
    Chunk(ChunkMsg),
    /// The instruction to exit the worker loop.
    Suicide,
}

#[derive(Debug)]
struct PriorityQueue {
    capacity: Semaphore,
    items: Mutex<VecDeque<ChunkMsg>>,
}

impl PriorityQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: Semaphore::new(capacity),
            items: Mutex::new(VecDeque::new()),
        }
    }
}

/// The three prioritized chunk queues plus the suicide queue.
#[derive(Debug)]
pub(crate) struct ChunkQueues {
    queues: [PriorityQueue; 3],
    pending_suicides: Mutex<usize>,
    notify: Notify,
}

impl ChunkQueues {
    /// Creates the queues with the given per-priority capacity.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queues: [
                PriorityQueue::new(capacity),
                PriorityQueue::new(capacity),
                PriorityQueue::new(capacity),
            ],
            pending_suicides: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueues a chunk message, waiting while the queue is at capacity.
    pub(crate) async fn push(&self, priority: Priority, msg: ChunkMsg) {
        let queue = &self.queues[u8::from(priority) as usize];
        queue
            .capacity
            .acquire()
            .await
            .expect("chunk queue semaphore is never closed")
            .forget();
        queue.items.lock().unwrap().push_back(msg);
        self.notify.notify_one();
    }

    /// Instructs one worker to exit.
    pub(crate) fn kill_one(&self) {
        *self.pending_suicides.lock().unwrap() += 1;
        self.notify.notify_one();
    }

    /// Receives the next message, preferring suicide notes, then chunks in
    /// priority order. Parks on the shared notifier when everything is
    /// empty.
    pub(crate) async fn next(&self) -> WorkerMsg {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for a wakeup before checking the queues, so a push
            // between the check and the await is not lost.
            notified.as_mut().enable();

            if let Some(msg) = self.try_next() {
                return msg;
            }
            notified.await;
        }
    }

    fn try_next(&self) -> Option<WorkerMsg> {
        {
            let mut suicides = self.pending_suicides.lock().unwrap();
            if *suicides > 0 {
                *suicides -= 1;
                return Some(WorkerMsg::Suicide);
            }
        }

        for queue in &self.queues {
            let msg = queue.items.lock().unwrap().pop_front();
            if let Some(msg) = msg {
                queue.capacity.add_permits(1);
                return Some(WorkerMsg::Chunk(msg));
            }
        }
        None
    }
}
