use super::column::Column;
use crate::storage::key::Key;

use anyhow::{bail, Result};

/// Named columns sharing one chunk layout.
///
/// Adding or removing a column only edits this list; no chunk is rewritten.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    group: u64,
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Frame {
    /// Empty frame with a fresh placement group.
    pub fn new() -> Self {
        Self::with_group(rand::random())
    }

    pub fn with_group(group: u64) -> Self {
        Self {
            group,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn group(&self) -> u64 {
        self.group
    }

    /// Key for a new column of this frame, co-located with its siblings.
    pub fn column_key(&self, name: &str) -> Key {
        Key::column(self.group, name)
    }

    pub fn add(&mut self, name: &str, column: Column) -> Result<()> {
        if self.find(name).is_some() {
            bail!("frame already has a column named {}", name);
        }
        if let Some(first) = self.columns.first() {
            if !first.same_layout(&column) {
                bail!(
                    "column {} has {} rows in {} chunks, frame has {} rows in {} chunks",
                    name,
                    column.len(),
                    column.nchunks(),
                    first.len(),
                    first.nchunks()
                );
            }
        }
        self.names.push(name.to_string());
        self.columns.push(column);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Column> {
        let idx = self.find(name)?;
        self.remove_at(idx)
    }

    pub fn remove_at(&mut self, idx: usize) -> Option<Column> {
        if idx >= self.columns.len() {
            return None;
        }
        self.names.remove(idx);
        Some(self.columns.remove(idx))
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.find(name).and_then(|idx| self.column(idx))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The last column; consumers treat it as the dependent variable.
    pub fn response(&self) -> Option<&Column> {
        self.columns.last()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> u64 {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    /// Layout every column follows: the first column.
    pub fn layout(&self) -> Option<&Column> {
        self.columns.first()
    }
}
