//! In-process multi-node cluster for tests.
//!
//! Every node gets a real UDP gossip socket and a real axum server on
//! loopback ephemeral ports. Members are added to each other directly and
//! gossip is not started, so the cloud is fixed for the life of the test.

use crate::executor::task::DistributedTask;
use crate::membership::cloud::Cloud;
use crate::membership::service::MembershipService;
use crate::node::ClusterNode;
use crate::rpc::RpcClient;

use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct LocalCluster {
    nodes: Vec<ClusterNode>,
    servers: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    pub async fn start(size: usize) -> Result<Self> {
        let mut nodes = Vec::with_capacity(size);
        let mut listeners = Vec::with_capacity(size);

        for _ in 0..size {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let http_addr = listener.local_addr()?;
            let gossip: SocketAddr = "127.0.0.1:0".parse()?;
            let membership = MembershipService::with_http_addr(gossip, http_addr, vec![]).await?;
            let rpc = RpcClient::new(Duration::from_secs(5), 3);
            nodes.push(ClusterNode::assemble(membership, 2, rpc));
            listeners.push(listener);
        }

        for node in &nodes {
            for peer in &nodes {
                node.membership.add_member(peer.info());
            }
        }

        let mut servers = Vec::with_capacity(size);
        for (node, listener) in nodes.iter().zip(listeners) {
            let app = node.router();
            servers.push(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("Test server stopped: {}", e);
                }
            }));
        }

        Ok(Self { nodes, servers })
    }

    pub fn node(&self, idx: usize) -> &ClusterNode {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn cloud(&self) -> Cloud {
        self.nodes[0].membership.cloud()
    }

    /// Node at position `idx` of the cloud order.
    pub fn by_cloud_index(&self, idx: usize) -> &ClusterNode {
        let cloud = self.cloud();
        let id = cloud.node(idx).map(|n| n.id.clone());
        self.nodes
            .iter()
            .find(|node| Some(node.id()) == id)
            .unwrap_or(&self.nodes[0])
    }

    pub fn register<T: DistributedTask>(&self) {
        for node in &self.nodes {
            node.register::<T>();
        }
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for server in &self.servers {
            server.abort();
        }
    }
}
