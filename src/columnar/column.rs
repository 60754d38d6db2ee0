use super::chunk::{Chunk, INT_NA};
use super::new_chunk::{ChunkSummary, NewChunk};
use crate::error::FabricError;
use crate::storage::key::Key;
use crate::storage::memory::DistributedStore;
use crate::storage::value::Value;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Column rollups, computed once when the column is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub is_int: bool,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub na_count: u64,
    /// Level names when the column holds category indices.
    pub domain: Option<Vec<String>>,
}

impl ColumnMeta {
    pub fn from_summary(summary: &ChunkSummary) -> Self {
        let observed = summary.observed();
        let (min, max, mean) = if observed == 0 {
            (f64::NAN, f64::NAN, f64::NAN)
        } else {
            (summary.min, summary.max, summary.sum / observed as f64)
        };
        Self {
            is_int: summary.is_int,
            min,
            max,
            mean,
            na_count: summary.na,
            domain: None,
        }
    }
}

/// A cluster-wide column: a header stored under a column key plus one chunk
/// per row range, each stored under `Key::chunk(column_key, cidx)`.
///
/// `espc` holds the row offset of every chunk start followed by the total row
/// count, so chunk `c` spans rows `espc[c]..espc[c + 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    key: Key,
    espc: Vec<u64>,
    meta: ColumnMeta,
}

impl Column {
    /// Freezes `chunks` and stores them together with the column header.
    /// Empty staging buffers are rejected: every chunk covers at least one row.
    pub async fn create(store: &DistributedStore, key: Key, chunks: Vec<NewChunk>) -> Result<Column> {
        let mut espc = Vec::with_capacity(chunks.len() + 1);
        let mut summary = ChunkSummary::default();
        let mut start = 0u64;

        for (cidx, staged) in chunks.iter().enumerate() {
            if staged.is_empty() {
                bail!("chunk {} of {} has no rows", cidx, key);
            }
            espc.push(start);
            start += staged.len() as u64;
            summary.merge(&staged.summary());

            let chunk = staged.compress();
            store
                .put(Key::chunk(&key, cidx as u32), chunk.serialize())
                .await?;
        }
        espc.push(start);

        let column = Column {
            key,
            espc,
            meta: ColumnMeta::from_summary(&summary),
        };
        column.publish(store).await?;
        tracing::debug!("Created column {} ({} rows, {} chunks)", column.key, column.len(), column.nchunks());
        Ok(column)
    }

    /// Builds a column header over chunks that are already stored.
    pub(crate) fn from_parts(key: Key, espc: Vec<u64>, meta: ColumnMeta) -> Self {
        Self { key, espc, meta }
    }

    pub(crate) async fn publish(&self, store: &DistributedStore) -> Result<()> {
        store.put(self.key.clone(), Value::encode(self)?).await?;
        Ok(())
    }

    /// Column named `name` with every row equal to `value`, laid out like `layout`.
    pub async fn make_con(store: &DistributedStore, layout: &Column, name: &str, value: f64) -> Result<Column> {
        let key = Key::column(layout.group(), name);
        for cidx in 0..layout.nchunks() {
            let rows = layout.chunk_len(cidx) as usize;
            let chunk = if value.fract() == 0.0 && value.abs() < 9.0e15 {
                Chunk::constant_int(value as i64, rows)
            } else {
                Chunk::constant_real(value, rows)
            };
            store
                .put(Key::chunk(&key, cidx as u32), chunk.serialize())
                .await?;
        }

        let rows = layout.len();
        let summary = ChunkSummary {
            rows,
            na: if value.is_nan() { rows } else { 0 },
            min: value,
            max: value,
            sum: value * rows as f64,
            is_int: value.is_nan() || value.fract() == 0.0,
        };
        let column = Column {
            key,
            espc: layout.espc.clone(),
            meta: ColumnMeta::from_summary(&summary),
        };
        column.publish(store).await?;
        Ok(column)
    }

    pub async fn make_zero(store: &DistributedStore, layout: &Column, name: &str) -> Result<Column> {
        Self::make_con(store, layout, name, 0.0).await
    }

    /// Loads a column header.
    pub async fn load(store: &DistributedStore, key: &Key) -> Result<Option<Column>> {
        match store.get(key).await? {
            Some(value) => Ok(Some(value.inflate()?)),
            None => Ok(None),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Placement group shared by this column's chunks.
    pub fn group(&self) -> u64 {
        self.key.group().unwrap_or_default()
    }

    pub fn meta(&self) -> &ColumnMeta {
        &self.meta
    }

    /// Marks the column categorical and republishes its header.
    pub async fn set_domain(&mut self, store: &DistributedStore, domain: Vec<String>) -> Result<()> {
        self.meta.domain = Some(domain);
        self.publish(store).await
    }

    pub fn espc(&self) -> &[u64] {
        &self.espc
    }

    pub fn len(&self) -> u64 {
        self.espc.last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nchunks(&self) -> usize {
        self.espc.len().saturating_sub(1)
    }

    pub fn chunk_start(&self, cidx: usize) -> u64 {
        self.espc[cidx]
    }

    pub fn chunk_len(&self, cidx: usize) -> u64 {
        self.espc[cidx + 1] - self.espc[cidx]
    }

    pub fn chunk_key(&self, cidx: usize) -> Key {
        Key::chunk(&self.key, cidx as u32)
    }

    pub fn chunk_keys(&self) -> Vec<Key> {
        (0..self.nchunks()).map(|c| self.chunk_key(c)).collect()
    }

    /// Index of the chunk holding `row`.
    pub fn chunk_for_row(&self, row: u64) -> Option<usize> {
        if row >= self.len() {
            return None;
        }
        Some(self.espc.partition_point(|&start| start <= row) - 1)
    }

    pub fn same_layout(&self, other: &Column) -> bool {
        self.espc == other.espc
    }

    pub async fn chunk(&self, store: &DistributedStore, cidx: usize) -> Result<Chunk> {
        if cidx >= self.nchunks() {
            bail!("chunk {} out of range for {} ({} chunks)", cidx, self.key, self.nchunks());
        }
        let key = self.chunk_key(cidx);
        let value = store
            .get(&key)
            .await?
            .ok_or_else(|| FabricError::Codec(format!("missing chunk {}", key)))?;
        Ok(Chunk::deserialize(value.bytes())?)
    }

    /// Row value as a double; NaN when missing.
    pub async fn at(&self, store: &DistributedStore, row: u64) -> Result<f64> {
        let (chunk, offset) = self.locate(store, row).await?;
        Ok(chunk.decode_float(offset))
    }

    /// Row value as an integer; [`INT_NA`] when missing.
    pub async fn at_int(&self, store: &DistributedStore, row: u64) -> Result<i64> {
        let (chunk, offset) = self.locate(store, row).await?;
        if chunk.is_na(offset) {
            return Ok(INT_NA);
        }
        Ok(chunk.decode_int(offset))
    }

    async fn locate(&self, store: &DistributedStore, row: u64) -> Result<(Chunk, usize)> {
        let Some(cidx) = self.chunk_for_row(row) else {
            bail!("row {} out of range for {} ({} rows)", row, self.key, self.len());
        };
        let chunk = self.chunk(store, cidx).await?;
        Ok((chunk, (row - self.espc[cidx]) as usize))
    }
}
