//! Map-Reduce Module Tests
//!
//! ## Test Scopes
//! - **Folding**: per-chunk partials folded within a node and across nodes.
//! - **Outputs**: staged output chunks frozen, stored and added to the frame.
//! - **Faults**: bad output staging and name clashes reach the caller.

#[cfg(test)]
mod tests {
    use crate::columnar::chunk::Chunk;
    use crate::columnar::column::Column;
    use crate::columnar::frame::Frame;
    use crate::columnar::new_chunk::NewChunk;
    use crate::config::JobParams;
    use crate::error::TaskFault;
    use crate::mapreduce::task::{MapReduce, MrTask};
    use crate::test_support::LocalCluster;

    use serde::{Deserialize, Serialize};

    /// Doubles column 0 into the first output and sums the doubled values.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Doubler {
        total: f64,
        chunks: u32,
    }

    impl MrTask for Doubler {
        const NAME: &'static str = "test.mr.doubler";

        fn map(&mut self, inputs: &[Chunk], outputs: &mut [NewChunk]) -> anyhow::Result<()> {
            let input = &inputs[0];
            for row in 0..input.len() {
                if input.is_na(row) {
                    if let Some(out) = outputs.first_mut() {
                        out.append_na();
                    }
                    continue;
                }
                let doubled = input.decode_int(row) * 2;
                self.total += doubled as f64;
                if let Some(out) = outputs.first_mut() {
                    out.append_int(doubled);
                }
            }
            self.chunks += 1;
            Ok(())
        }

        fn reduce(&mut self, other: Self) {
            self.total += other.total;
            self.chunks += other.chunks;
        }
    }

    /// Records the first row of every chunk it sees, in fold order.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct FirstRows {
        firsts: Vec<i64>,
    }

    impl MrTask for FirstRows {
        const NAME: &'static str = "test.mr.firsts";

        fn map(&mut self, inputs: &[Chunk], _outputs: &mut [NewChunk]) -> anyhow::Result<()> {
            self.firsts.push(inputs[0].decode_int(0));
            Ok(())
        }

        fn reduce(&mut self, other: Self) {
            self.firsts.extend(other.firsts);
        }
    }

    /// Leaves its output buffer short by one row.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct ShortOutput;

    impl MrTask for ShortOutput {
        const NAME: &'static str = "test.mr.short";

        fn map(&mut self, inputs: &[Chunk], outputs: &mut [NewChunk]) -> anyhow::Result<()> {
            for _ in 1..inputs[0].len() {
                outputs[0].append_int(1);
            }
            Ok(())
        }

        fn reduce(&mut self, _other: Self) {}
    }

    /// Counts rows at or above a configured threshold.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct AtLeast {
        min: i64,
        count: u64,
    }

    impl MrTask for AtLeast {
        const NAME: &'static str = "test.mr.at_least";

        fn map(&mut self, inputs: &[Chunk], _outputs: &mut [NewChunk]) -> anyhow::Result<()> {
            let input = &inputs[0];
            self.count += (0..input.len())
                .filter(|&row| !input.is_na(row) && input.decode_int(row) >= self.min)
                .count() as u64;
            Ok(())
        }

        fn reduce(&mut self, other: Self) {
            self.count += other.count;
        }

        fn configure(&mut self, params: &JobParams) -> anyhow::Result<()> {
            self.min = params.required_u64("min")? as i64;
            Ok(())
        }
    }

    fn staged(values: &[i64]) -> NewChunk {
        let mut nc = NewChunk::new();
        for &v in values {
            nc.append_int(v);
        }
        nc
    }

    async fn frame_of(cluster: &LocalCluster, chunks: &[&[i64]]) -> Frame {
        let store = &cluster.node(0).store;
        let mut frame = Frame::new();
        let staged: Vec<NewChunk> = chunks.iter().map(|rows| staged(rows)).collect();
        let column = Column::create(store, frame.column_key("x"), staged).await.unwrap();
        frame.add("x", column).unwrap();
        frame
    }

    // ============================================================
    // FOLDING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_double_and_sum_two_chunks() {
        // ARRANGE
        let cluster = LocalCluster::start(1).await.unwrap();
        cluster.register::<MapReduce<Doubler>>();
        let mut frame = frame_of(&cluster, &[&[1, 2, 3], &[4, 5]]).await;

        // ACT
        let result = MapReduce::new(Doubler::default())
            .do_all(&cluster.node(0).engine, &mut frame)
            .await
            .unwrap();

        // ASSERT
        assert_eq!(result.job.total, 30.0);
        assert_eq!(result.job.chunks, 2);
        assert!(result.outputs.is_empty());
        assert_eq!(frame.num_cols(), 1);
    }

    #[tokio::test]
    async fn test_double_and_sum_across_nodes() {
        let cluster = LocalCluster::start(3).await.unwrap();
        cluster.register::<MapReduce<Doubler>>();
        let mut frame = frame_of(&cluster, &[&[1, 2], &[3], &[4, 5, 6], &[7], &[8, 9], &[10]]).await;

        let result = MapReduce::new(Doubler::default())
            .do_all(&cluster.node(2).engine, &mut frame)
            .await
            .unwrap();

        assert_eq!(result.job.total, 110.0);
        assert_eq!(result.job.chunks, 6, "Every chunk mapped exactly once");
    }

    #[tokio::test]
    async fn test_local_partials_fold_in_chunk_order() {
        let cluster = LocalCluster::start(1).await.unwrap();
        cluster.register::<MapReduce<FirstRows>>();
        let mut frame = frame_of(&cluster, &[&[10], &[20, 21], &[30], &[40]]).await;

        let result = MapReduce::new(FirstRows::default())
            .do_all(&cluster.node(0).engine, &mut frame)
            .await
            .unwrap();

        assert_eq!(result.job.firsts, vec![10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_job_params_reach_every_node() {
        let cluster = LocalCluster::start(2).await.unwrap();
        cluster.register::<MapReduce<AtLeast>>();
        let mut frame = frame_of(&cluster, &[&[1, 5, 9], &[2, 6], &[7]]).await;
        let params = JobParams::parse("min=5").unwrap();

        let result = MapReduce::new(AtLeast::default())
            .with_params(&params)
            .unwrap()
            .do_all(&cluster.node(1).engine, &mut frame)
            .await
            .unwrap();

        assert_eq!(result.job.min, 5);
        assert_eq!(result.job.count, 4);
    }

    #[test]
    fn test_missing_job_param_is_rejected() {
        let result = MapReduce::new(AtLeast::default()).with_params(&JobParams::new());

        assert!(matches!(result, Err(TaskFault::IllegalArgument(msg)) if msg.contains("min")));
    }

    // ============================================================
    // OUTPUT COLUMN TESTS
    // ============================================================

    #[tokio::test]
    async fn test_outputs_are_added_to_frame() {
        // ARRANGE
        let cluster = LocalCluster::start(3).await.unwrap();
        cluster.register::<MapReduce<Doubler>>();
        let mut frame = frame_of(&cluster, &[&[1, 2, 3], &[4, 5]]).await;
        let store = &cluster.node(1).store;

        // ACT
        let result = MapReduce::new(Doubler::default())
            .with_outputs(&["doubled"])
            .do_all(&cluster.node(1).engine, &mut frame)
            .await
            .unwrap();

        // ASSERT
        assert_eq!(frame.names(), &["x".to_string(), "doubled".to_string()]);
        let doubled = frame.column_by_name("doubled").unwrap();
        assert_eq!(doubled, &result.outputs[0]);
        assert!(doubled.same_layout(frame.column(0).unwrap()));
        assert_eq!(doubled.at_int(store, 0).await.unwrap(), 2);
        assert_eq!(doubled.at_int(store, 4).await.unwrap(), 10);

        let meta = doubled.meta();
        assert!(meta.is_int);
        assert_eq!(meta.min, 2.0);
        assert_eq!(meta.max, 10.0);
        assert_eq!(meta.mean, 6.0);
        assert_eq!(meta.na_count, 0);

        let reloaded = Column::load(&cluster.node(2).store, doubled.key()).await.unwrap();
        assert_eq!(reloaded.as_ref(), Some(doubled));
    }

    #[tokio::test]
    async fn test_missing_rows_stay_missing_in_output() {
        let cluster = LocalCluster::start(2).await.unwrap();
        cluster.register::<MapReduce<Doubler>>();
        let store = &cluster.node(0).store;
        let mut frame = Frame::new();
        let mut with_na = staged(&[1]);
        with_na.append_na();
        let column = Column::create(store, frame.column_key("x"), vec![with_na, staged(&[3])])
            .await
            .unwrap();
        frame.add("x", column).unwrap();

        let result = MapReduce::new(Doubler::default())
            .with_outputs(&["doubled"])
            .do_all(&cluster.node(0).engine, &mut frame)
            .await
            .unwrap();

        let doubled = &result.outputs[0];
        assert_eq!(result.job.total, 8.0);
        assert!(doubled.at(store, 1).await.unwrap().is_nan());
        assert_eq!(doubled.meta().na_count, 1);
    }

    // ============================================================
    // FAULT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_short_output_is_rejected() {
        let cluster = LocalCluster::start(2).await.unwrap();
        cluster.register::<MapReduce<ShortOutput>>();
        let mut frame = frame_of(&cluster, &[&[1, 2], &[3, 4]]).await;

        let result = MapReduce::new(ShortOutput)
            .with_outputs(&["short"])
            .do_all(&cluster.node(0).engine, &mut frame)
            .await;

        assert!(matches!(result, Err(TaskFault::IllegalArgument(msg)) if msg.contains("has 1 rows")));
        assert_eq!(frame.num_cols(), 1);
    }

    #[tokio::test]
    async fn test_output_name_clash_and_empty_frame() {
        let cluster = LocalCluster::start(1).await.unwrap();
        cluster.register::<MapReduce<Doubler>>();
        let engine = &cluster.node(0).engine;
        let mut frame = frame_of(&cluster, &[&[1]]).await;
        let mut empty = Frame::new();

        let clash = MapReduce::new(Doubler::default())
            .with_outputs(&["x"])
            .do_all(engine, &mut frame)
            .await;
        let nothing = MapReduce::new(Doubler::default()).do_all(engine, &mut empty).await;

        assert!(matches!(clash, Err(TaskFault::IllegalArgument(_))));
        assert!(matches!(nothing, Err(TaskFault::IllegalArgument(_))));
    }
}
