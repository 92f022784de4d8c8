//! The control-plane HTTP handlers.
//!
//! All verbs go through `/` and are selected with the `commandType` query
//! parameter: `copy`, `cancel`, `pause` and `resume` are POSTs carrying a
//! JSON body, `list` is a GET carrying its arguments JSON-encoded in the
//! `command` query parameter. Accepted requests answer 202.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde::Deserialize;
use ste_types::{CopyJobPartOrder, JobId, ListJobPartsTransfers};

use crate::error::{ApiError, ApiResult};
use crate::state::ServiceState;

pub fn routes() -> Router<ServiceState> {
    Router::new().route("/", routing::get(handle_get).post(handle_post))
}

#[derive(Debug, Deserialize)]
struct CommandQuery {
    #[serde(rename = "commandType")]
    command_type: String,
    /// JSON-encoded arguments of the `list` verb.
    command: Option<String>,
}

async fn handle_post(
    State(state): State<ServiceState>,
    Query(query): Query<CommandQuery>,
    body: Bytes,
) -> ApiResult<Response> {
    match query.command_type.as_str() {
        "copy" => {
            let order: CopyJobPartOrder = serde_json::from_slice(&body)
                .map_err(|err| ApiError::BadRequest(format!("malformed job part order: {err}")))?;
            state.engine.submit(&order)?;
            Ok(accepted(format!(
                "job part order accepted for job {} part {}",
                order.job_id, order.part_num
            )))
        }
        "cancel" => {
            let job_id = job_id_from(&body)?;
            state.engine.cancel(job_id)?;
            Ok(accepted(format!("job {job_id} cancelled successfully")))
        }
        "pause" => {
            let job_id = job_id_from(&body)?;
            state.engine.pause(job_id)?;
            Ok(accepted(format!("job {job_id} paused successfully")))
        }
        "resume" => {
            let job_id = job_id_from(&body)?;
            state.engine.resume(job_id)?;
            Ok(accepted(format!("job {job_id} resumed successfully")))
        }
        other => Err(ApiError::BadRequest(format!(
            "unknown command type {other:?}"
        ))),
    }
}

async fn handle_get(
    State(state): State<ServiceState>,
    Query(query): Query<CommandQuery>,
) -> ApiResult<Response> {
    match query.command_type.as_str() {
        "list" => {
            let request = match &query.command {
                Some(command) => serde_json::from_str(command).map_err(|err| {
                    ApiError::BadRequest(format!("malformed list command: {err}"))
                })?,
                None => ListJobPartsTransfers::default(),
            };
            let response = state.engine.list(&request)?;
            Ok((StatusCode::ACCEPTED, Json(response)).into_response())
        }
        other => Err(ApiError::BadRequest(format!(
            "unknown command type {other:?}"
        ))),
    }
}

fn job_id_from(body: &[u8]) -> ApiResult<JobId> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("malformed job id: {err}")))
}

fn accepted(message: String) -> Response {
    (StatusCode::ACCEPTED, message).into_response()
}
