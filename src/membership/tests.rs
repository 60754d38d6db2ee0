//! Membership Module Tests
//!
//! ## Test Scopes
//! - **Data Structures**: id uniqueness and wire-message serialization.
//! - **Service Logic**: initialization, member registration, address derivation.
//! - **Failure Detection**: gossip handling and silence-driven state changes,
//!   driven without sockets through `handle` and `sweep`.
//! - **Cloud**: deterministic ordering and index lookup.

#[cfg(test)]
mod tests {
    use crate::membership::cloud::Cloud;
    use crate::membership::service::{MembershipService, Outbound};
    use crate::membership::types::{GossipMessage, Node, NodeId, NodeState};
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    fn node(id: &str, port: u16) -> Node {
        Node {
            id: NodeId(id.to_string()),
            gossip_addr: format!("127.0.0.1:{}", port).parse().unwrap(),
            http_addr: format!("127.0.0.1:{}", port + 1000).parse().unwrap(),
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: None,
        }
    }

    // ============================================================
    // NODE ID TESTS
    // ============================================================

    #[test]
    fn test_node_id_is_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();

        assert_ne!(id1, id2, "Each NodeId should be unique");
    }

    #[test]
    fn test_node_id_ordering_is_lexicographic() {
        assert!(NodeId("a".to_string()) < NodeId("b".to_string()));
        assert!(NodeId("node-10".to_string()) < NodeId("node-9".to_string()));
    }

    // ============================================================
    // SERIALIZATION TESTS
    // ============================================================

    #[test]
    fn test_node_serialization_skips_last_seen() {
        let mut original = node("test-node", 5000);
        original.last_seen = Some(std::time::Instant::now());

        let json = serde_json::to_string(&original).expect("Serialization failed");
        let restored: Node = serde_json::from_str(&json).expect("Deserialization failed");

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.http_addr, original.http_addr);
        assert!(restored.last_seen.is_none());
    }

    #[test]
    fn test_gossip_ack_bincode() {
        let msg = GossipMessage::Ack {
            from: NodeId("responder".to_string()),
            incarnation: 10,
            members: vec![node("node-1", 5000), node("node-2", 5001)],
        };

        let encoded = bincode::serialize(&msg).expect("Failed to serialize Ack");
        let decoded: GossipMessage =
            bincode::deserialize(&encoded).expect("Failed to deserialize Ack");

        match decoded {
            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                assert_eq!(from.0, "responder");
                assert_eq!(incarnation, 10);
                assert_eq!(members.len(), 2);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    // ============================================================
    // CLOUD TESTS
    // ============================================================

    #[test]
    fn test_cloud_orders_by_id() {
        let cloud = Cloud::new(vec![node("c", 1), node("a", 2), node("b", 3)]);

        let ids: Vec<&str> = cloud.ids().map(|id| id.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(cloud.nidx(&NodeId("b".to_string())), Some(1));
        assert_eq!(cloud.nidx(&NodeId("zz".to_string())), None);
    }

    #[test]
    fn test_cloud_order_independent_of_input_order() {
        let one = Cloud::new(vec![node("x", 1), node("y", 2), node("z", 3)]);
        let two = Cloud::new(vec![node("z", 3), node("x", 1), node("y", 2)]);

        for i in 0..3 {
            assert_eq!(one.node(i).unwrap().id, two.node(i).unwrap().id);
        }
    }

    #[test]
    fn test_cloud_drops_duplicates() {
        let cloud = Cloud::new(vec![node("a", 1), node("a", 1), node("b", 2)]);
        assert_eq!(cloud.size(), 2);
    }

    // ============================================================
    // MEMBERSHIP SERVICE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_membership_service_creation() {
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let service = MembershipService::new(bind_addr, vec![])
            .await
            .expect("Failed to create service");

        assert_eq!(service.members.len(), 1);
        let alive = service.live_members();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].id, service.local_node.id);
        assert_ne!(service.local_node.gossip_addr.port(), 0);
    }

    #[tokio::test]
    async fn test_membership_explicit_http_addr() {
        let http: SocketAddr = "127.0.0.1:7123".parse().unwrap();
        let service =
            MembershipService::with_http_addr("127.0.0.1:0".parse().unwrap(), http, vec![])
                .await
                .unwrap();

        assert_eq!(service.local_node.http_addr, http);
    }

    #[tokio::test]
    async fn test_add_member_extends_cloud() {
        let service = MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap();

        service.add_member(node("peer-1", 9000));
        service.add_member(node("peer-2", 9001));
        // Re-adding self is ignored.
        service.add_member(service.local_node.clone());

        let cloud = service.cloud();
        assert_eq!(cloud.size(), 3);
        assert!(cloud.nidx(&service.local_node.id).is_some());
        assert!(service.get_member(&NodeId("peer-2".to_string())).is_some());
    }

    // ============================================================
    // FAILURE DETECTION TESTS
    // ============================================================

    async fn service() -> std::sync::Arc<MembershipService> {
        MembershipService::new("127.0.0.1:0".parse().unwrap(), vec![])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_member_list() {
        let service = service().await;
        service.add_member(node("peer-1", 9000));

        let out = service.handle(GossipMessage::Ping {
            from: NodeId("peer-1".to_string()),
            incarnation: 4,
        });

        match out {
            Outbound::Reply(GossipMessage::Ack { from, members, .. }) => {
                assert_eq!(from, service.local_node.id);
                assert_eq!(members.len(), 2);
            }
            other => panic!("Expected an ack, got {:?}", other),
        }
        let peer = service.get_member(&NodeId("peer-1".to_string())).unwrap();
        assert_eq!(peer.incarnation, 4);
    }

    #[tokio::test]
    async fn test_join_and_ack_grow_the_cloud() {
        let service = service().await;
        let before = service.epoch();

        service.handle(GossipMessage::Join {
            node: node("joiner", 9100),
        });
        service.handle(GossipMessage::Ack {
            from: NodeId("joiner".to_string()),
            incarnation: 1,
            members: vec![node("gossiped", 9200), service.local_node.clone()],
        });

        assert_eq!(service.cloud().size(), 3);
        assert_eq!(service.epoch(), before + 2);
    }

    #[tokio::test]
    async fn test_silent_member_is_suspected_then_dead() {
        let service = service().await;
        service.add_member(node("quiet", 9300));
        let quiet = NodeId("quiet".to_string());
        let now = Instant::now();

        let early = service.sweep(now + Duration::from_secs(1));
        let suspicions = service.sweep(now + Duration::from_secs(6));

        assert!(early.is_empty());
        assert_eq!(suspicions.len(), 1);
        assert_eq!(service.get_member(&quiet).unwrap().state, NodeState::Suspect);
        assert_eq!(service.cloud().size(), 2, "Suspects stay in the cloud");

        service.sweep(now + Duration::from_secs(12));

        assert_eq!(service.get_member(&quiet).unwrap().state, NodeState::Dead);
        assert_eq!(service.cloud().size(), 1);
        assert!(service.cloud().nidx(&quiet).is_none());
    }

    #[tokio::test]
    async fn test_suspicion_of_self_is_refuted() {
        let service = service().await;
        let incarnation = service.incarnation();

        let out = service.handle(GossipMessage::Suspect {
            node_id: service.local_node.id.clone(),
            incarnation,
        });

        match out {
            Outbound::Broadcast(GossipMessage::Alive { node_id, incarnation: refuted }) => {
                assert_eq!(node_id, service.local_node.id);
                assert_eq!(refuted, incarnation + 1);
            }
            other => panic!("Expected an alive broadcast, got {:?}", other),
        }
        assert_eq!(service.incarnation(), incarnation + 1);
    }

    #[tokio::test]
    async fn test_alive_revives_suspect_peer() {
        let service = service().await;
        service.add_member(node("flaky", 9400));
        let flaky = NodeId("flaky".to_string());

        service.handle(GossipMessage::Suspect {
            node_id: flaky.clone(),
            incarnation: 1,
        });
        assert_eq!(service.get_member(&flaky).unwrap().state, NodeState::Suspect);

        service.handle(GossipMessage::Alive {
            node_id: flaky.clone(),
            incarnation: 2,
        });

        let member = service.get_member(&flaky).unwrap();
        assert_eq!(member.state, NodeState::Alive);
        assert_eq!(member.incarnation, 2);
    }
}
