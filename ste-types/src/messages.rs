//! Request and response shapes of the `list` control plane verb.

use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus, TransferStatus};

/// Arguments of the `list` verb.
///
/// Without a job id, the engine answers with [`ExistingJobDetails`]. With a
/// job id and the [`TransferStatus::Any`] filter it answers with a
/// [`JobProgressSummary`]; with a concrete status it answers with the
/// matching [`TransfersDetail`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListJobPartsTransfers {
    /// The job to report on, or `None` to enumerate known jobs.
    pub job_id: Option<JobId>,
    /// The status transfers must have to be reported.
    pub expected_transfer_status: TransferStatus,
}

impl Default for ListJobPartsTransfers {
    fn default() -> Self {
        Self {
            job_id: None,
            expected_transfer_status: TransferStatus::Any,
        }
    }
}

/// The jobs currently known to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExistingJobDetails {
    /// Identifiers of all registered jobs, in sorted order.
    pub job_ids: Vec<JobId>,
}

/// Source, destination and status of one transfer, as reported by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransferDetail {
    /// The transfer's source.
    pub src: String,
    /// The transfer's destination.
    pub dst: String,
    /// The transfer's current status.
    pub transfer_status: TransferStatus,
}

/// The transfers of a job matching a requested status filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransfersDetail {
    /// The matching transfers.
    pub details: Vec<TransferDetail>,
}

/// Progress roll-up over all received parts of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobProgressSummary {
    /// Whether the part marked final has been received.
    pub complete_job_ordered: bool,
    /// Roll-up status of the job.
    pub job_status: JobStatus,
    /// Number of transfers across all received parts.
    pub total_number_of_transfers: u32,
    /// Number of transfers that completed successfully.
    pub total_number_of_transfers_completed: u32,
    /// Number of transfers that failed or were skipped.
    pub total_number_of_transfers_failed: u32,
    /// Terminal transfers as a percentage of all transfers.
    pub percentage_progress: u32,
    /// Details of every failed transfer.
    pub failed_transfers: Vec<TransferDetail>,
    /// Engine-wide throughput sampled at report time.
    pub throughput_in_bytes_per_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_request_defaults_to_any() {
        let req: ListJobPartsTransfers = serde_json::from_str("{}").unwrap();
        assert_eq!(req.job_id, None);
        assert_eq!(req.expected_transfer_status, TransferStatus::Any);
    }

    #[test]
    fn list_request_roundtrips() {
        let req = ListJobPartsTransfers {
            job_id: Some(JobId::new_random()),
            expected_transfer_status: TransferStatus::Failed,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(serde_json::from_str::<ListJobPartsTransfers>(&json).unwrap(), req);
    }
}
