//! Executor Module Tests
//!
//! ## Test Scopes
//! - **Split**: bucket completeness and bisection on synthetic clouds.
//! - **Worker pool / registry**: fault classification and task lookup.
//! - **Engine**: fork-join runs on a `LocalCluster`, including fold order,
//!   fault propagation from every branch, array keys and registered futures.

#[cfg(test)]
mod tests {
    use crate::error::TaskFault;
    use crate::executor::pool::WorkerPool;
    use crate::executor::split::split;
    use crate::executor::task::{DistributedTask, TaskContext};
    use crate::executor::tree::TaskTree;
    use crate::executor::types::{Branch, DException, FaultOrigin, TaskState};
    use crate::membership::cloud::Cloud;
    use crate::membership::types::{Node, NodeId, NodeState};
    use crate::storage::key::Key;
    use crate::test_support::LocalCluster;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, BTreeSet};

    fn fake_cloud(n: usize) -> Cloud {
        let members = (0..n)
            .map(|i| Node {
                id: NodeId(format!("node-{:02}", i)),
                gossip_addr: format!("127.0.0.1:{}", 7000 + i).parse().unwrap(),
                http_addr: format!("127.0.0.1:{}", 8000 + i).parse().unwrap(),
                state: NodeState::Alive,
                incarnation: 1,
                last_seen: None,
            })
            .collect();
        Cloud::new(members)
    }

    /// Keys pinned to the given cloud indices, `per_node` of each.
    fn keys_on(cluster: &LocalCluster, indices: &[usize], per_node: usize) -> Vec<Key> {
        let cloud = cluster.cloud();
        let mut keys = Vec::new();
        for &idx in indices {
            let id = cloud.node(idx).unwrap().id.clone();
            for i in 0..per_node {
                keys.push(Key::pinned(&format!("k{}-{}", idx, i), &id));
            }
        }
        keys
    }

    // --- Test tasks ---

    /// Records which node saw which key.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct VisitTask {
        seen: BTreeMap<String, Vec<NodeId>>,
        local_runs: u32,
        inits: u32,
    }

    #[async_trait]
    impl DistributedTask for VisitTask {
        const NAME: &'static str = "test.visit";

        fn init(&mut self) {
            self.inits += 1;
        }

        async fn local_compute(&mut self, ctx: &TaskContext) -> anyhow::Result<()> {
            for key in ctx.keys() {
                self.seen
                    .entry(key.to_string())
                    .or_default()
                    .push(ctx.node_id().clone());
            }
            self.local_runs += 1;
            Ok(())
        }

        fn reduce(&mut self, other: Self) {
            for (key, nodes) in other.seen {
                self.seen.entry(key).or_default().extend(nodes);
            }
            self.local_runs += other.local_runs;
            self.inits += other.inits;
        }
    }

    /// Non-commutative reduce: the trail shows the fold order.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct TrailTask {
        trail: Vec<usize>,
    }

    #[async_trait]
    impl DistributedTask for TrailTask {
        const NAME: &'static str = "test.trail";

        async fn local_compute(&mut self, ctx: &TaskContext) -> anyhow::Result<()> {
            let idx = ctx.cloud().nidx(ctx.node_id()).unwrap_or(usize::MAX);
            self.trail.push(idx);
            Ok(())
        }

        fn reduce(&mut self, other: Self) {
            self.trail.extend(other.trail);
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
    enum FailMode {
        Error,
        Typed,
        Panic,
        Future,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct FailTask {
        fail_on: NodeId,
        mode: FailMode,
        ok_runs: u32,
    }

    #[async_trait]
    impl DistributedTask for FailTask {
        const NAME: &'static str = "test.fail";

        async fn local_compute(&mut self, ctx: &TaskContext) -> anyhow::Result<()> {
            if ctx.node_id() != &self.fail_on {
                self.ok_runs += 1;
                return Ok(());
            }
            match self.mode {
                FailMode::Error => anyhow::bail!("boom on purpose"),
                FailMode::Typed => {
                    Err(TaskFault::IllegalArgument("bad column".to_string()).into())
                }
                FailMode::Panic => {
                    let empty: Vec<u32> = Vec::new();
                    let _ = empty[ctx.keys().len()];
                    Ok(())
                }
                FailMode::Future => {
                    ctx.also_block_for(tokio::spawn(async { Err::<(), _>(anyhow::anyhow!("late failure")) }));
                    Ok(())
                }
            }
        }

        fn reduce(&mut self, other: Self) {
            self.ok_runs += other.ok_runs;
        }
    }

    /// Writes one marker key per local key through a registered future.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct MarkTask;

    #[async_trait]
    impl DistributedTask for MarkTask {
        const NAME: &'static str = "test.mark";

        async fn local_compute(&mut self, ctx: &TaskContext) -> anyhow::Result<()> {
            for key in ctx.keys() {
                let store = ctx.store().clone();
                let marker = Key::make(&format!("mark-{}", key.name()));
                ctx.also_block_for(tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    store.put(marker, b"done".to_vec()).await?;
                    Ok::<(), anyhow::Error>(())
                }));
            }
            Ok(())
        }

        fn reduce(&mut self, _other: Self) {}
    }

    // ============================================================
    // SPLIT TESTS
    // ============================================================

    #[test]
    fn test_split_is_a_partition_of_the_keys() {
        let cloud = fake_cloud(7);
        let keys: Vec<Key> = (0..500).map(|i| Key::make(&format!("key{}", i))).collect();

        for self_idx in [None, Some(0), Some(3), Some(6)] {
            let buckets = split(&keys, &cloud, self_idx);

            let mut all: Vec<Key> = buckets
                .local
                .iter()
                .chain(&buckets.low)
                .chain(&buckets.high)
                .cloned()
                .collect();
            all.sort();
            let mut expected = keys.clone();
            expected.sort();
            assert_eq!(all, expected, "Keys lost or duplicated for {:?}", self_idx);
        }
    }

    #[test]
    fn test_split_bisects_at_midpoint() {
        let cloud = fake_cloud(5);
        let keys: Vec<Key> = (0..5)
            .map(|i| Key::pinned("p", &cloud.node(i).unwrap().id))
            .collect();

        let buckets = split(&keys, &cloud, Some(3));

        // lo = 0, hi = 4, mid = 2
        assert_eq!(buckets.local, vec![keys[3].clone()]);
        assert_eq!(buckets.low, vec![keys[0].clone(), keys[1].clone()]);
        assert_eq!(buckets.high, vec![keys[2].clone(), keys[4].clone()]);
    }

    #[test]
    fn test_split_single_home_goes_to_one_bucket() {
        let cloud = fake_cloud(4);
        let id = cloud.node(2).unwrap().id.clone();
        let keys = vec![Key::pinned("a", &id), Key::pinned("b", &id)];

        let remote = split(&keys, &cloud, Some(0));
        let local = split(&keys, &cloud, Some(2));

        assert_eq!(remote.high.len(), 2);
        assert!(remote.low.is_empty() && remote.local.is_empty());
        assert_eq!(local.local.len(), 2);
        assert!(split(&[], &cloud, Some(0)).is_empty());
    }

    // ============================================================
    // POOL, REGISTRY AND TREE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_pool_classifies_faults() {
        let pool = WorkerPool::new(2);

        let value = pool.run(|| Ok(21 * 2)).await;
        let error = pool.run(|| -> anyhow::Result<()> { anyhow::bail!("nope") }).await;
        let typed = pool
            .run(|| -> anyhow::Result<()> { Err(TaskFault::IllegalArgument("x".into()).into()) })
            .await;
        let panic = pool
            .run(|| -> anyhow::Result<()> { panic!("invariant broken") })
            .await;

        assert_eq!(value, Ok(42));
        assert!(matches!(error, Err(TaskFault::Runtime(msg)) if msg.contains("nope")));
        assert_eq!(typed, Err(TaskFault::IllegalArgument("x".into())));
        assert!(matches!(panic, Err(TaskFault::Assertion(msg)) if msg.contains("invariant broken")));
    }

    #[test]
    fn test_fault_origin_is_carried_for_diagnostics() {
        let node = NodeId("node-07".to_string());
        let shipped = DException::distribution(TaskFault::Rpc("refused".into()), node.clone());
        let local = DException::local(TaskFault::Rpc("refused".into()), node);

        assert_eq!(shipped.origin, FaultOrigin::Distribution);
        assert_eq!(local.origin, FaultOrigin::LocalWork);
        assert_eq!(shipped.fault, local.fault, "Origin never alters the fault itself");
        assert!(shipped.to_string().contains("node-07"));
        assert!(shipped.to_string().contains("Distribution"));
    }

    #[tokio::test]
    async fn test_registry_lists_registered_tasks() {
        let cluster = LocalCluster::start(1).await.unwrap();
        let registry = cluster.node(0).engine.registry();

        cluster.register::<VisitTask>();

        assert!(registry.has_task("test.visit"));
        assert!(!registry.has_task("test.trail"));
        assert_eq!(registry.task_names(), vec!["test.visit".to_string()]);
    }

    #[tokio::test]
    async fn test_tree_records_local_run() {
        let cluster = LocalCluster::start(1).await.unwrap();
        let engine = &cluster.node(0).engine;
        let tree = TaskTree::new();

        let result = engine
            .distribute(VisitTask::default(), vec![Key::make("only")], &tree)
            .await
            .unwrap();

        assert_eq!(result.local_runs, 1);
        assert_eq!(tree.state(0), Some(TaskState::Completed));
        let children = tree.children(0);
        assert_eq!(children.len(), 1);
        let child = tree.node(children[0]).unwrap();
        assert_eq!(child.branch, Branch::Local);
        assert_eq!(child.state, TaskState::Reduced);
    }

    // ============================================================
    // ENGINE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_invoke_visits_every_key_at_its_home() {
        // ARRANGE
        let cluster = LocalCluster::start(3).await.unwrap();
        cluster.register::<VisitTask>();
        let cloud = cluster.cloud();
        let keys: Vec<Key> = (0..40).map(|i| Key::make(&format!("row{}", i))).collect();

        // ACT
        let result = cluster
            .node(1)
            .engine
            .invoke(VisitTask::default(), &keys)
            .await
            .unwrap();

        // ASSERT
        assert_eq!(result.seen.len(), 40);
        for key in &keys {
            let seen_by = &result.seen[&key.to_string()];
            assert_eq!(seen_by.len(), 1, "{} processed {} times", key, seen_by.len());
            assert_eq!(seen_by[0], cloud.node(key.home(&cloud)).unwrap().id);
        }
        assert_eq!(result.inits, result.local_runs);
    }

    #[tokio::test]
    async fn test_empty_key_set_completes_immediately() {
        let cluster = LocalCluster::start(2).await.unwrap();
        cluster.register::<VisitTask>();

        let result = cluster.node(0).engine.invoke(VisitTask::default(), &[]).await.unwrap();

        assert_eq!(result.local_runs, 0);
    }

    #[tokio::test]
    async fn test_fold_order_is_low_high_local() {
        let cluster = LocalCluster::start(3).await.unwrap();
        cluster.register::<TrailTask>();
        let keys = keys_on(&cluster, &[0, 1, 2], 1);

        let result = cluster
            .by_cloud_index(1)
            .engine
            .invoke(TrailTask::default(), &keys)
            .await
            .unwrap();

        assert_eq!(result.trail, vec![0, 2, 1]);
    }

    #[tokio::test]
    async fn test_invoke_on_all_nodes_runs_once_per_member() {
        let cluster = LocalCluster::start(4).await.unwrap();
        cluster.register::<VisitTask>();

        let result = cluster
            .node(2)
            .engine
            .invoke_on_all_nodes(VisitTask::default())
            .await
            .unwrap();

        assert_eq!(result.local_runs, 4);
        let nodes: BTreeSet<NodeId> = result.seen.values().flatten().cloned().collect();
        assert_eq!(nodes.len(), 4);
    }

    #[tokio::test]
    async fn test_fault_wins_from_every_branch() {
        // ARRANGE
        let cluster = LocalCluster::start(3).await.unwrap();
        cluster.register::<FailTask>();
        let cloud = cluster.cloud();
        let keys = keys_on(&cluster, &[0, 1, 2], 3);
        let caller = cluster.by_cloud_index(1);

        // Invoked from index 1: index 0 is low, 2 is high, 1 is local.
        for failing in 0..3 {
            let task = FailTask {
                fail_on: cloud.node(failing).unwrap().id.clone(),
                mode: FailMode::Error,
                ok_runs: 0,
            };

            // ACT
            let result = caller.engine.invoke(task, &keys).await;

            // ASSERT
            match result {
                Err(TaskFault::Runtime(msg)) => assert!(msg.contains("boom on purpose")),
                other => panic!("Expected runtime fault from index {}, got {:?}", failing, other),
            }
        }
    }

    #[tokio::test]
    async fn test_typed_fault_reaches_caller_unchanged() {
        let cluster = LocalCluster::start(2).await.unwrap();
        cluster.register::<FailTask>();
        let keys = keys_on(&cluster, &[0, 1], 2);
        let task = FailTask {
            fail_on: cluster.by_cloud_index(1).id(),
            mode: FailMode::Typed,
            ok_runs: 0,
        };

        let result = cluster.by_cloud_index(0).engine.invoke(task, &keys).await;

        assert_eq!(result.unwrap_err(), TaskFault::IllegalArgument("bad column".to_string()));
    }

    #[tokio::test]
    async fn test_remote_panic_becomes_assertion_fault() {
        let cluster = LocalCluster::start(2).await.unwrap();
        cluster.register::<FailTask>();
        let keys = keys_on(&cluster, &[0, 1], 1);
        let task = FailTask {
            fail_on: cluster.by_cloud_index(0).id(),
            mode: FailMode::Panic,
            ok_runs: 0,
        };

        let result = cluster.by_cloud_index(1).engine.invoke(task, &keys).await;

        assert!(
            matches!(result, Err(TaskFault::Assertion(ref msg)) if msg.contains("index out of bounds")),
            "got {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_failing_registered_future_fails_task() {
        let cluster = LocalCluster::start(2).await.unwrap();
        cluster.register::<FailTask>();
        let keys = keys_on(&cluster, &[0, 1], 1);
        let task = FailTask {
            fail_on: cluster.by_cloud_index(1).id(),
            mode: FailMode::Future,
            ok_runs: 0,
        };

        let result = cluster.by_cloud_index(0).engine.invoke(task, &keys).await;

        assert!(matches!(result, Err(TaskFault::Runtime(msg)) if msg.contains("late failure")));
    }

    #[tokio::test]
    async fn test_registered_futures_finish_before_invoke_returns() {
        let cluster = LocalCluster::start(3).await.unwrap();
        cluster.register::<MarkTask>();
        let keys = keys_on(&cluster, &[0, 1, 2], 2);

        cluster.node(0).engine.invoke(MarkTask, &keys).await.unwrap();

        for key in &keys {
            let marker = Key::make(&format!("mark-{}", key.name()));
            let value = cluster.node(0).store.get(&marker).await.unwrap();
            assert!(value.is_some(), "{} not written before completion", marker);
        }
    }

    #[tokio::test]
    async fn test_unregistered_task_on_peer_is_reported() {
        let cluster = LocalCluster::start(2).await.unwrap();
        let caller = cluster.by_cloud_index(0);
        caller.register::<TrailTask>();
        let keys = keys_on(&cluster, &[0, 1], 1);

        let result = caller.engine.invoke(TrailTask::default(), &keys).await;

        assert_eq!(result.unwrap_err(), TaskFault::UnknownTask("test.trail".to_string()));
    }

    #[tokio::test]
    async fn test_array_key_expands_to_children() {
        // ARRANGE
        let cluster = LocalCluster::start(2).await.unwrap();
        cluster.register::<VisitTask>();
        let children: Vec<Key> = (0..6).map(|i| Key::make(&format!("shard{}", i))).collect();
        let array = Key::array("shards");
        cluster.node(1).store.put_array(array.clone(), &children).await.unwrap();

        // ACT
        let result = cluster
            .node(0)
            .engine
            .invoke(VisitTask::default(), std::slice::from_ref(&array))
            .await
            .unwrap();
        let mixed = cluster
            .node(0)
            .engine
            .invoke(VisitTask::default(), &[array, Key::make("extra")])
            .await;

        // ASSERT
        let seen: BTreeSet<String> = result.seen.keys().cloned().collect();
        let expected: BTreeSet<String> = children.iter().map(|k| k.to_string()).collect();
        assert_eq!(seen, expected);
        assert!(matches!(mixed, Err(TaskFault::IllegalArgument(_))));
    }

    #[tokio::test]
    async fn test_dfork_returns_handle() {
        let cluster = LocalCluster::start(2).await.unwrap();
        cluster.register::<VisitTask>();
        let keys = keys_on(&cluster, &[0, 1], 5);

        let handle = cluster.node(0).engine.dfork(VisitTask::default(), keys);
        let result = handle.get().await.unwrap();

        assert_eq!(result.seen.len(), 10);
        assert_eq!(result.local_runs, 2);
    }
}
