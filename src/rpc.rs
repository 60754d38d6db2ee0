//! Inter-node HTTP calls.
//!
//! Request and response bodies are bincode-encoded. Failed sends are retried
//! with exponential backoff plus jitter; callers opt into full retries only
//! for requests that are idempotent on the receiving side.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;

pub const CONTENT_TYPE_BINCODE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Retry on any send failure, including timeouts.
    Idempotent,
    /// Retry only when the connection could not be established.
    ConnectOnly,
}

#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl RpcClient {
    pub fn new(timeout: Duration, attempts: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            attempts: attempts.max(1),
        }
    }

    /// Short-lived request: bounded by the configured timeout.
    pub async fn call<Req, Resp>(&self, addr: SocketAddr, endpoint: &str, req: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.post(addr, endpoint, req, Some(self.timeout), Retry::Idempotent)
            .await
    }

    /// Request that waits as long as the peer needs to answer.
    pub async fn call_unbounded<Req, Resp>(
        &self,
        addr: SocketAddr,
        endpoint: &str,
        req: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.post(addr, endpoint, req, None, Retry::ConnectOnly).await
    }

    async fn post<Req, Resp>(
        &self,
        addr: SocketAddr,
        endpoint: &str,
        req: &Req,
        timeout: Option<Duration>,
        retry: Retry,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("http://{}{}", addr, endpoint);
        let body = bincode::serialize(req)?;
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let mut request = self
                .http
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_BINCODE)
                .body(body.clone());
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(resp) => {
                    if !resp.status().is_success() {
                        return Err(anyhow::anyhow!("{} returned {}", url, resp.status()));
                    }
                    let bytes = resp.bytes().await?;
                    return Ok(bincode::deserialize(&bytes)?);
                }
                Err(e) => {
                    let retryable = match retry {
                        Retry::Idempotent => true,
                        Retry::ConnectOnly => e.is_connect(),
                    };
                    if !retryable || attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!("POST {} failed: {}", url, e));
                    }
                    tracing::debug!("POST {} failed (attempt {}): {}", url, attempt + 1, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

/// Encodes a handler response body.
pub fn encode_body<T: Serialize>(resp: &T) -> (axum::http::StatusCode, Vec<u8>) {
    match bincode::serialize(resp) {
        Ok(bytes) => (axum::http::StatusCode::OK, bytes),
        Err(e) => {
            tracing::error!("Failed to encode response: {}", e);
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}
