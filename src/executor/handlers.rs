use super::engine::TaskEngine;
use super::protocol::DTaskRequest;
use crate::rpc::encode_body;

use axum::{body::Bytes, http::StatusCode, Extension};
use std::sync::Arc;

/// Runs a shipped sub-range to completion.
///
/// Faults during distribution are answered with `200` and the fault in the
/// envelope, so the sender's branch still completes.
pub async fn handle_dtask(
    Extension(engine): Extension<Arc<TaskEngine>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req: DTaskRequest = match bincode::deserialize(&body) {
        Ok(req) => req,
        Err(e) => {
            tracing::error!("Failed to decode task envelope: {}", e);
            return (StatusCode::BAD_REQUEST, Vec::new());
        }
    };

    tracing::debug!(
        "Received {} keys of {} ({} bytes)",
        req.keys.len(),
        req.task_name,
        req.task.len()
    );
    let resp = engine.serve_remote(req).await;
    encode_body(&resp)
}
