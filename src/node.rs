//! Node assembly: membership, store, task engine and the HTTP router.

use crate::config::NodeConfig;
use crate::executor::engine::TaskEngine;
use crate::executor::handlers::handle_dtask;
use crate::executor::pool::WorkerPool;
use crate::executor::protocol::ENDPOINT_DTASK;
use crate::executor::task::DistributedTask;
use crate::membership::service::MembershipService;
use crate::membership::types::{Node, NodeId};
use crate::rpc::RpcClient;
use crate::storage::handlers::*;
use crate::storage::memory::DistributedStore;
use crate::storage::partitioner::PartitionManager;
use crate::storage::protocol::*;

use anyhow::Result;
use axum::{
    extract::Extension,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const ENDPOINT_CLOUD: &str = "/cloud";

#[derive(Debug, Serialize)]
pub struct CloudMember {
    pub index: usize,
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub incarnation: u64,
}

#[derive(Debug, Serialize)]
pub struct CloudResponse {
    pub self_id: NodeId,
    pub members: Vec<CloudMember>,
}

pub struct ClusterNode {
    pub membership: Arc<MembershipService>,
    pub partitioner: Arc<PartitionManager>,
    pub store: Arc<DistributedStore>,
    pub engine: Arc<TaskEngine>,
}

impl ClusterNode {
    /// Binds the gossip socket and builds every layer on top of it.
    pub async fn bootstrap(config: &NodeConfig) -> Result<Self> {
        config.validate()?;
        let membership =
            MembershipService::with_http_addr(config.bind, config.http_addr(), config.seeds.clone())
                .await?;
        let rpc = RpcClient::new(config.rpc_timeout(), config.rpc_attempts);
        Ok(Self::assemble(membership, config.worker_count(), rpc))
    }

    pub fn assemble(membership: Arc<MembershipService>, workers: usize, rpc: RpcClient) -> Self {
        let partitioner = PartitionManager::new(membership.clone());
        let store = Arc::new(DistributedStore::new(
            membership.clone(),
            partitioner.clone(),
            rpc.clone(),
        ));
        let engine = TaskEngine::new(
            membership.clone(),
            store.clone(),
            WorkerPool::new(workers),
            rpc,
        );
        Self {
            membership,
            partitioner,
            store,
            engine,
        }
    }

    pub fn id(&self) -> NodeId {
        self.membership.local_node.id.clone()
    }

    pub fn info(&self) -> Node {
        self.membership.local_node.clone()
    }

    pub fn register<T: DistributedTask>(&self) {
        self.engine.register::<T>();
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(ENDPOINT_CLOUD, get(handle_cloud))
            .route(ENDPOINT_DKV_GET, post(handle_get))
            .route(ENDPOINT_DKV_PUT, post(handle_put))
            .route(ENDPOINT_DKV_CAS, post(handle_cas))
            .route(ENDPOINT_DKV_REMOVE, post(handle_remove))
            .route(ENDPOINT_DKV_INVALIDATE, post(handle_invalidate))
            .route(ENDPOINT_DTASK, post(handle_dtask))
            .layer(Extension(self.store.clone()))
            .layer(Extension(self.engine.clone()))
            .layer(Extension(self.membership.clone()))
    }

    /// Starts gossip and the stats reporter, then serves HTTP until the
    /// listener fails.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        let service = self.membership.clone();
        tokio::spawn(async move {
            service.start().await;
        });

        let stats_service = self.membership.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                let cloud = stats_service.cloud();
                tracing::info!("Cloud size: {}", cloud.size());
                for (idx, node) in cloud.members().iter().enumerate() {
                    tracing::debug!("  [{}] {} http={} (inc={})", idx, node.id, node.http_addr, node.incarnation);
                }
            }
        });

        tracing::info!("HTTP server listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn handle_cloud(
    Extension(membership): Extension<Arc<MembershipService>>,
) -> Json<CloudResponse> {
    let members = membership
        .cloud()
        .members()
        .iter()
        .enumerate()
        .map(|(index, node)| CloudMember {
            index,
            id: node.id.clone(),
            gossip_addr: node.gossip_addr,
            http_addr: node.http_addr,
            incarnation: node.incarnation,
        })
        .collect();
    Json(CloudResponse {
        self_id: membership.local_node.id.clone(),
        members,
    })
}
