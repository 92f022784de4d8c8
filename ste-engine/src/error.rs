use ste_types::{JobId, PartNumber};
use thiserror::Error;

use crate::plan::PlanError;

/// Errors surfaced by engine operations.
///
/// Only control-plane operations return these; chunk-level failures are
/// recorded in the plan and never propagate up the call stack.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A plan file could not be created, opened or updated.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The addressed job has no registered parts.
    #[error("unknown job {0}")]
    UnknownJob(JobId),

    /// The part was already submitted for this job.
    #[error("part {1} of job {0} was already submitted")]
    DuplicatePart(JobId, PartNumber),

    /// The order is malformed or unsupported.
    #[error("invalid job part order: {0}")]
    InvalidOrder(String),

    /// An I/O error outside the plan codec.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
