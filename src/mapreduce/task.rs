use crate::columnar::chunk::Chunk;
use crate::columnar::column::{Column, ColumnMeta};
use crate::columnar::frame::Frame;
use crate::columnar::new_chunk::{ChunkSummary, NewChunk};
use crate::config::JobParams;
use crate::error::TaskFault;
use crate::executor::engine::TaskEngine;
use crate::executor::task::{DistributedTask, TaskContext};
use crate::storage::key::Key;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-chunk user code.
///
/// `map` sees the chunk of every frame column at one chunk index, in frame
/// column order. When the job declares output columns, `outputs` holds one
/// empty staging buffer per output and each must end up with exactly one row
/// per input row.
pub trait MrTask: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    fn map(&mut self, inputs: &[Chunk], outputs: &mut [NewChunk]) -> anyhow::Result<()>;

    /// Merges another partial result into `self`. Must be associative.
    fn reduce(&mut self, other: Self);

    /// Reads job parameters once, on the submitting node, before any chunk is
    /// mapped. The configured job is what every node receives.
    fn configure(&mut self, _params: &JobParams) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Finished job: the folded task plus the output columns added to the frame.
#[derive(Debug, Clone)]
pub struct MrOutput<M> {
    pub job: M,
    pub outputs: Vec<Column>,
}

/// Adapts an [`MrTask`] to the fork-join engine.
///
/// Register `MapReduce<M>` on every node before calling [`MapReduce::do_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapReduce<M> {
    job: M,
    output_names: Vec<String>,
    inputs: Vec<Column>,
    outputs: Vec<Key>,
    /// Per chunk index, one summary per output column.
    summaries: BTreeMap<u32, Vec<ChunkSummary>>,
}

impl<M: MrTask> MapReduce<M> {
    pub fn new(job: M) -> Self {
        Self {
            job,
            output_names: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            summaries: BTreeMap::new(),
        }
    }

    /// Declares output columns, created in the frame under these names.
    pub fn with_outputs(mut self, names: &[&str]) -> Self {
        self.output_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Configures the job from `params`. Rejected parameters surface as
    /// `IllegalArgument`.
    pub fn with_params(mut self, params: &JobParams) -> Result<Self, TaskFault> {
        self.job
            .configure(params)
            .map_err(|e| TaskFault::IllegalArgument(format!("{}: {}", M::NAME, e)))?;
        Ok(self)
    }

    /// Runs the job over every chunk of `frame` and adds the declared outputs
    /// to it.
    pub async fn do_all(mut self, engine: &Arc<TaskEngine>, frame: &mut Frame) -> Result<MrOutput<M>, TaskFault> {
        let Some(layout) = frame.layout().cloned() else {
            return Err(TaskFault::IllegalArgument("frame has no columns".to_string()));
        };
        for name in &self.output_names {
            if frame.find(name).is_some() {
                return Err(TaskFault::IllegalArgument(format!(
                    "frame already has a column named {}",
                    name
                )));
            }
        }

        let names = std::mem::take(&mut self.output_names);
        self.inputs = frame.columns().to_vec();
        self.outputs = names.iter().map(|name| frame.column_key(name)).collect();
        let keys = layout.chunk_keys();
        tracing::info!(
            "Map-reduce {} over {} chunks ({} outputs)",
            M::NAME,
            keys.len(),
            names.len()
        );

        let done = engine.invoke(self, &keys).await?;

        let mut outputs = Vec::with_capacity(names.len());
        for (oidx, (name, key)) in names.iter().zip(&done.outputs).enumerate() {
            let mut summary = ChunkSummary::default();
            for cidx in 0..layout.nchunks() as u32 {
                let part = done
                    .summaries
                    .get(&cidx)
                    .and_then(|parts| parts.get(oidx))
                    .ok_or_else(|| TaskFault::Runtime(format!("chunk {} of {} was never mapped", cidx, name)))?;
                summary.merge(part);
            }

            let column = Column::from_parts(key.clone(), layout.espc().to_vec(), ColumnMeta::from_summary(&summary));
            column.publish(engine.store()).await.map_err(TaskFault::from_anyhow)?;
            frame.add(name, column.clone()).map_err(|e| TaskFault::IllegalArgument(e.to_string()))?;
            outputs.push(column);
        }

        Ok(MrOutput {
            job: done.job,
            outputs,
        })
    }

    /// Maps one chunk on a fresh copy of the job. Returns the partial result
    /// and the summary of every output chunk.
    async fn map_chunk(&self, ctx: &TaskContext, key: &Key) -> anyhow::Result<(u32, M, Vec<ChunkSummary>)> {
        let cidx = key
            .chunk_index()
            .ok_or_else(|| TaskFault::IllegalArgument(format!("{} is not a chunk key", key)))?;
        let layout = self
            .inputs
            .first()
            .ok_or_else(|| TaskFault::IllegalArgument("no input columns".to_string()))?;
        let rows = layout.chunk_len(cidx as usize) as usize;

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for column in &self.inputs {
            inputs.push(column.chunk(ctx.store(), cidx as usize).await?);
        }

        let mut job = self.job.clone();
        let nout = self.outputs.len();
        let (job, staged) = ctx
            .pool()
            .run(move || {
                let mut staged: Vec<NewChunk> = (0..nout).map(|_| NewChunk::with_capacity(rows)).collect();
                job.map(&inputs, &mut staged)?;
                Ok((job, staged))
            })
            .await?;

        let mut summaries = Vec::with_capacity(nout);
        for (out, chunk) in self.outputs.iter().zip(staged) {
            if chunk.len() != rows {
                return Err(TaskFault::IllegalArgument(format!(
                    "output {} chunk {} has {} rows, input has {}",
                    out,
                    cidx,
                    chunk.len(),
                    rows
                ))
                .into());
            }
            summaries.push(chunk.summary());
            let bytes = chunk.compress().serialize();
            let store = ctx.store().clone();
            let chunk_key = Key::chunk(out, cidx);
            ctx.also_block_for(tokio::spawn(async move {
                store.put(chunk_key, bytes).await?;
                Ok::<(), anyhow::Error>(())
            }));
        }
        Ok((cidx, job, summaries))
    }
}

#[async_trait]
impl<M: MrTask> DistributedTask for MapReduce<M> {
    const NAME: &'static str = M::NAME;

    async fn local_compute(&mut self, ctx: &TaskContext) -> anyhow::Result<()> {
        let mut folded: Option<M> = None;
        for key in ctx.keys() {
            let (cidx, part, summaries) = self.map_chunk(ctx, key).await?;
            self.summaries.insert(cidx, summaries);
            match folded.as_mut() {
                Some(acc) => acc.reduce(part),
                None => folded = Some(part),
            }
        }
        if let Some(job) = folded {
            self.job = job;
        }
        Ok(())
    }

    fn reduce(&mut self, other: Self) {
        self.job.reduce(other.job);
        self.summaries.extend(other.summaries);
    }
}
