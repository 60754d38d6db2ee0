use axum::{body::Bytes, extract::Extension, http::StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::memory::DistributedStore;
use super::protocol::{
    Ack, CasRequest, CasResponse, GetRequest, GetResponse, InvalidateRequest, PutRequest,
    PutResponse, RemoveRequest, WireValue,
};
use crate::rpc::encode_body;

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, (StatusCode, Vec<u8>)> {
    bincode::deserialize(body).map_err(|e| {
        tracing::error!("Failed to decode store request: {}", e);
        (StatusCode::BAD_REQUEST, Vec::new())
    })
}

pub async fn handle_get(
    Extension(store): Extension<Arc<DistributedStore>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req: GetRequest = match decode(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let value = store
        .serve_get(&req.key, &req.requester, req.cache)
        .map(|value| WireValue {
            bytes: value.bytes().to_vec(),
            version: value.version(),
        });
    encode_body(&GetResponse { value })
}

pub async fn handle_put(
    Extension(store): Extension<Arc<DistributedStore>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req: PutRequest = match decode(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let version = store
        .store_as_home(&req.op_id, req.key, req.bytes, &req.origin)
        .await;
    encode_body(&PutResponse { version })
}

pub async fn handle_cas(
    Extension(store): Extension<Arc<DistributedStore>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req: CasRequest = match decode(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let committed = store
        .compare_and_set(
            &req.op_id,
            &req.key,
            req.expected_version,
            req.bytes,
            &req.origin,
        )
        .await;
    encode_body(&CasResponse {
        committed: committed.is_some(),
        version: committed.unwrap_or(req.expected_version),
    })
}

pub async fn handle_remove(
    Extension(store): Extension<Arc<DistributedStore>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req: RemoveRequest = match decode(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    tracing::debug!("REMOVE {} (op {}) from {:?}", req.key, req.op_id, req.origin);
    store.remove_as_home(&req.key).await;
    encode_body(&Ack { success: true })
}

pub async fn handle_invalidate(
    Extension(store): Extension<Arc<DistributedStore>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let req: InvalidateRequest = match decode(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    store.invalidate(&req.key, req.version);
    encode_body(&Ack { success: true })
}
