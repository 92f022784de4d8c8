//! Per-transfer execution: dispatch, prologues, chunk functions, epilogues.

pub(crate) mod download;
pub(crate) mod upload;

use std::future::Future;
use std::sync::Arc;

use ste_types::{JobId, Location, PartNumber, Priority, TransferStatus};
use tracing::Instrument;

use crate::blob::{BlobClient, BlobError};
use crate::plan::PlanHandle;
use crate::registry::{PartEntry, TransferState};
use crate::scheduler::TransferMsg;
use crate::EngineInner;

/// Everything a prologue and its chunk functions need, passed by value.
///
/// Holds the part entry (plan handle plus runtime state) and plain indices
/// rather than references into other structures, so chunk closures can be
/// `'static` and outlive the dispatcher that created them.
#[derive(Debug, Clone)]
pub(crate) struct TransferCtx {
    pub inner: Arc<EngineInner>,
    pub entry: Arc<PartEntry>,
    pub state: Arc<TransferState>,
    pub job_id: JobId,
    pub part_num: PartNumber,
    pub transfer_idx: u32,
    pub priority: Priority,
    pub source: String,
    pub destination: String,
}

impl TransferCtx {
    pub(crate) fn plan(&self) -> &PlanHandle {
        &self.entry.plan
    }

    pub(crate) fn client(&self) -> &dyn BlobClient {
        self.inner.client.as_ref()
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// Moves the transfer to the given status; returns whether this call
    /// performed the transition. Terminal statuses are sticky.
    pub(crate) fn set_status(&self, status: TransferStatus) -> bool {
        match self.plan().set_transfer_status(self.transfer_idx, status) {
            Ok(transitioned) => transitioned,
            Err(err) => {
                tracing::error!(error = %err, "failed to record transfer status");
                false
            }
        }
    }

    /// Runs a remote operation, abandoning it when the cancellation token
    /// trips. This is the I/O boundary at which in-flight chunks observe
    /// cancellation.
    pub(crate) async fn run_cancellable<T>(
        &self,
        op: impl Future<Output = Result<T, BlobError>>,
    ) -> Result<T, BlobError> {
        tokio::select! {
            _ = self.state.cancel.cancelled() => Err(BlobError::Cancelled),
            result = op => result,
        }
    }
}

/// Looks up a dispatched transfer and runs the prologue for its direction.
pub(crate) async fn execute(inner: &Arc<EngineInner>, msg: TransferMsg) {
    let Some(entry) = inner.registry.get(msg.job_id, msg.part_num) else {
        tracing::warn!(
            job_id = %msg.job_id,
            part = %msg.part_num,
            "dropping transfer of an unregistered job part"
        );
        return;
    };
    let Some(state) = entry.transfers.get(msg.transfer_idx as usize).cloned() else {
        tracing::error!(
            job_id = %msg.job_id,
            part = %msg.part_num,
            transfer = msg.transfer_idx,
            "dropping transfer with an out-of-range index"
        );
        return;
    };

    // A terminal transfer must never be re-executed, e.g. when a job is
    // resumed while completed parts are still registered.
    if entry
        .plan
        .transfer_status(msg.transfer_idx)
        .map(|status| status.is_terminal())
        .unwrap_or(true)
    {
        return;
    }

    let (source, destination) = match (
        entry.plan.source(msg.transfer_idx),
        entry.plan.destination(msg.transfer_idx),
    ) {
        (Ok(source), Ok(destination)) => (source.to_owned(), destination.to_owned()),
        (Err(err), _) | (_, Err(err)) => {
            tracing::error!(error = %err, "failed to read transfer endpoints from plan");
            let _ = entry
                .plan
                .set_transfer_status(msg.transfer_idx, TransferStatus::Failed);
            return;
        }
    };

    let ctx = TransferCtx {
        inner: Arc::clone(inner),
        state,
        job_id: msg.job_id,
        part_num: msg.part_num,
        transfer_idx: msg.transfer_idx,
        priority: entry.plan.priority(),
        source,
        destination,
        entry,
    };

    let span = tracing::info_span!(
        "transfer",
        job_id = %ctx.job_id,
        part = %ctx.part_num,
        transfer = ctx.transfer_idx,
    );

    let header = ctx.plan().header();
    let direction = (
        Location::try_from(header.src_location),
        Location::try_from(header.dst_location),
    );
    match direction {
        (Ok(Location::Local), Ok(Location::Blob)) => upload::run(ctx).instrument(span).await,
        (Ok(Location::Blob), Ok(Location::Local)) => download::run(ctx).instrument(span).await,
        _ => {
            let _enter = span.enter();
            tracing::error!("unsupported transfer direction");
            ctx.set_status(TransferStatus::Failed);
        }
    }
}
