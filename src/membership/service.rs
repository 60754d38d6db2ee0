use anyhow::Result;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use super::cloud::Cloud;
use super::types::{GossipMessage, Node, NodeId, NodeState};

/// HTTP port offset used when no explicit HTTP address is configured.
pub const HTTP_PORT_OFFSET: u16 = 1000;

const MAX_DATAGRAM: usize = 65536;

/// Failure-detector timing.
#[derive(Debug, Clone, Copy)]
pub struct GossipTiming {
    /// How often a random peer is pinged.
    pub probe_every: Duration,
    /// How often silent members are checked.
    pub sweep_every: Duration,
    /// Silence after which an alive member becomes suspect.
    pub suspect_after: Duration,
    /// Silence after which a suspect member is declared dead.
    pub dead_after: Duration,
}

impl Default for GossipTiming {
    fn default() -> Self {
        Self {
            probe_every: Duration::from_millis(500),
            sweep_every: Duration::from_secs(2),
            suspect_after: Duration::from_secs(5),
            dead_after: Duration::from_secs(10),
        }
    }
}

/// What handling one datagram asks the network loop to send.
#[derive(Debug)]
pub(crate) enum Outbound {
    Nothing,
    Reply(GossipMessage),
    Broadcast(GossipMessage),
}

pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    incarnation: AtomicU64,
    /// Bumped whenever a member enters or leaves the cloud.
    epoch: AtomicU64,
    timing: GossipTiming,
}

impl MembershipService {
    /// Binds the gossip socket and derives the HTTP address as gossip port + 1000.
    pub async fn new(bind_addr: SocketAddr, seed_nodes: Vec<SocketAddr>) -> Result<Arc<Self>> {
        let http_addr = SocketAddr::new(
            bind_addr.ip(),
            bind_addr.port().wrapping_add(HTTP_PORT_OFFSET),
        );
        Self::with_http_addr(bind_addr, http_addr, seed_nodes).await
    }

    pub async fn with_http_addr(
        bind_addr: SocketAddr,
        http_addr: SocketAddr,
        seed_nodes: Vec<SocketAddr>,
    ) -> Result<Arc<Self>> {
        Self::with_timing(bind_addr, http_addr, seed_nodes, GossipTiming::default()).await
    }

    /// Binds the gossip socket and sends a join request to every seed.
    pub async fn with_timing(
        bind_addr: SocketAddr,
        http_addr: SocketAddr,
        seed_nodes: Vec<SocketAddr>,
        timing: GossipTiming,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let local_node = Node {
            id: NodeId::new(),
            gossip_addr: socket.local_addr()?,
            http_addr,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };
        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        if !seed_nodes.is_empty() {
            tracing::info!("Joining cluster via {} seed node(s)", seed_nodes.len());
            let join = bincode::serialize(&GossipMessage::Join {
                node: local_node.clone(),
            })?;
            for seed in &seed_nodes {
                socket.send_to(&join, seed).await?;
                tracing::debug!("Sent join request to {}", seed);
            }
        }

        Ok(Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            incarnation: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            timing,
        }))
    }

    /// Spawns the probe, receive and sweep loops.
    pub async fn start(self: Arc<Self>) {
        let service = self.clone();
        tokio::spawn(async move { service.probe_loop().await });

        let service = self.clone();
        tokio::spawn(async move { service.receive_loop().await });

        let service = self.clone();
        tokio::spawn(async move { service.sweep_loop().await });

        tracing::info!("Membership started for {}", self.local_node.id);
    }

    /// Members not declared dead. Suspects stay in the cloud until they are.
    pub fn live_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state != NodeState::Dead)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the live members in cloud order.
    pub fn cloud(&self) -> Cloud {
        Cloud::new(self.live_members())
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::Acquire)
    }

    /// Registers a peer directly, without waiting for gossip to discover it.
    pub fn add_member(&self, mut node: Node) {
        if node.id == self.local_node.id {
            return;
        }
        node.last_seen = Some(Instant::now());
        let joined = node.state != NodeState::Dead;
        tracing::info!("Adding member {} (http={})", node.id, node.http_addr);
        let previous = self.members.insert(node.id.clone(), node);
        let was_live = previous.is_some_and(|p| p.state != NodeState::Dead);
        if joined != was_live {
            self.cloud_changed();
        }
    }

    fn cloud_changed(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!("Cloud changed: {} live members (epoch {})", self.live_members().len(), epoch);
    }

    fn ping(&self) -> GossipMessage {
        GossipMessage::Ping {
            from: self.local_node.id.clone(),
            incarnation: self.incarnation(),
        }
    }

    fn ack(&self) -> GossipMessage {
        GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: self.incarnation(),
            members: self.members.iter().map(|e| e.value().clone()).collect(),
        }
    }

    async fn send(&self, msg: &GossipMessage, to: SocketAddr) {
        match bincode::serialize(msg) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, to).await {
                    tracing::warn!("Gossip send to {} failed: {}", to, e);
                }
            }
            Err(e) => tracing::error!("Cannot encode gossip message: {}", e),
        }
    }

    async fn broadcast(&self, msg: &GossipMessage) {
        for member in self.live_members() {
            if member.id != self.local_node.id {
                self.send(msg, member.gossip_addr).await;
            }
        }
    }

    async fn probe_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.timing.probe_every);
        loop {
            interval.tick().await;
            let target = {
                let peers: Vec<Node> = self
                    .live_members()
                    .into_iter()
                    .filter(|node| node.id != self.local_node.id)
                    .collect();
                peers.choose(&mut rand::thread_rng()).map(|n| (n.id.clone(), n.gossip_addr))
            };
            if let Some((id, addr)) = target {
                tracing::trace!("Probing {}", id);
                self.send(&self.ping(), addr).await;
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!("Gossip receive failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let msg = match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!("Dropping malformed datagram from {}: {}", src, e);
                    continue;
                }
            };
            match self.handle(msg) {
                Outbound::Nothing => {}
                Outbound::Reply(reply) => self.send(&reply, src).await,
                Outbound::Broadcast(update) => self.broadcast(&update).await,
            }
        }
    }

    /// Applies one gossip message to the member table.
    pub(crate) fn handle(&self, msg: GossipMessage) -> Outbound {
        match msg {
            GossipMessage::Ping { from, incarnation } => {
                if !self.heard_from(&from, incarnation) {
                    // A ping alone carries no HTTP address; the ack's member list will.
                    tracing::debug!("Ping from unknown member {}", from);
                }
                Outbound::Reply(self.ack())
            }
            GossipMessage::Ack { from, incarnation, members } => {
                self.heard_from(&from, incarnation);
                for member in members {
                    self.merge(member);
                }
                Outbound::Nothing
            }
            GossipMessage::Join { node } => {
                tracing::info!("{} joining at {}", node.id, node.gossip_addr);
                self.add_member(node);
                Outbound::Reply(self.ack())
            }
            GossipMessage::Suspect { node_id, incarnation } => self.suspect(node_id, incarnation),
            GossipMessage::Alive { node_id, incarnation } => {
                self.revive(&node_id, incarnation);
                Outbound::Nothing
            }
        }
    }

    /// Refreshes a known member. Returns false when `from` is unknown.
    fn heard_from(&self, from: &NodeId, incarnation: u64) -> bool {
        let Some(mut member) = self.members.get_mut(from) else {
            return false;
        };
        member.last_seen = Some(Instant::now());
        member.incarnation = member.incarnation.max(incarnation);
        let revived = member.state == NodeState::Dead;
        if member.state != NodeState::Alive {
            member.state = NodeState::Alive;
        }
        drop(member);
        if revived {
            self.cloud_changed();
        }
        true
    }

    fn merge(&self, update: Node) {
        if update.id == self.local_node.id {
            return;
        }
        let Some(mut existing) = self.members.get_mut(&update.id) else {
            tracing::info!("Discovered {} at {}", update.id, update.gossip_addr);
            self.add_member(update);
            return;
        };

        let newer = update.incarnation > existing.incarnation;
        let refutes = update.incarnation == existing.incarnation
            && update.state == NodeState::Alive
            && existing.state == NodeState::Suspect;
        if !(newer || refutes) {
            return;
        }

        let was_live = existing.state != NodeState::Dead;
        existing.state = update.state;
        existing.incarnation = update.incarnation;
        existing.last_seen = Some(Instant::now());
        let is_live = existing.state != NodeState::Dead;
        drop(existing);
        if was_live != is_live {
            self.cloud_changed();
        }
    }

    fn suspect(&self, node_id: NodeId, incarnation: u64) -> Outbound {
        if node_id == self.local_node.id {
            let current = self.incarnation();
            if incarnation < current {
                return Outbound::Nothing;
            }
            let refuted = incarnation + 1;
            self.incarnation.store(refuted, Ordering::Release);
            tracing::info!("Refuting suspicion with incarnation {}", refuted);
            return Outbound::Broadcast(GossipMessage::Alive {
                node_id,
                incarnation: refuted,
            });
        }

        if let Some(mut member) = self.members.get_mut(&node_id) {
            if incarnation >= member.incarnation && member.state == NodeState::Alive {
                tracing::info!("{} suspected by a peer", member.id);
                member.state = NodeState::Suspect;
                member.incarnation = incarnation;
            }
        }
        Outbound::Nothing
    }

    fn revive(&self, node_id: &NodeId, incarnation: u64) {
        let Some(mut member) = self.members.get_mut(node_id) else {
            return;
        };
        let newer = incarnation > member.incarnation;
        let refutes = incarnation == member.incarnation && member.state == NodeState::Suspect;
        if !(newer || refutes) {
            return;
        }
        let revived = member.state == NodeState::Dead;
        member.state = NodeState::Alive;
        member.incarnation = incarnation;
        member.last_seen = Some(Instant::now());
        tracing::info!("{} alive (inc={})", member.id, incarnation);
        drop(member);
        if revived {
            self.cloud_changed();
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.timing.sweep_every);
        loop {
            interval.tick().await;
            for msg in self.sweep(Instant::now()) {
                self.broadcast(&msg).await;
            }
        }
    }

    /// Moves silent members toward `Dead` as of `now` and returns the
    /// suspicions to broadcast.
    pub(crate) fn sweep(&self, now: Instant) -> Vec<GossipMessage> {
        let mut suspicions = Vec::new();
        let mut died = false;

        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();
            if member.id == self.local_node.id {
                continue;
            }
            let Some(last_seen) = member.last_seen else {
                member.last_seen = Some(now);
                continue;
            };
            let silent = now.saturating_duration_since(last_seen);

            match member.state {
                NodeState::Alive if silent > self.timing.suspect_after => {
                    tracing::warn!("{} suspected (silent for {:?})", member.id, silent);
                    member.state = NodeState::Suspect;
                    suspicions.push(GossipMessage::Suspect {
                        node_id: member.id.clone(),
                        incarnation: member.incarnation,
                    });
                }
                NodeState::Suspect if silent > self.timing.dead_after => {
                    tracing::warn!("{} declared dead", member.id);
                    member.state = NodeState::Dead;
                    died = true;
                }
                _ => {}
            }
        }

        if died {
            self.cloud_changed();
        }
        suspicions
    }
}
