//! Schema: an ordered sequence of named, typed columns with precomputed
//! inline offsets for tuple packing.
//!
//! The inline region of a packed tuple holds one cell per column (fixed-width
//! values verbatim, variable-width values as a 2-byte tail offset); the
//! offsets are computed once here so the tuple codec never re-derives them.

use super::Column;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
    /// Byte offset of each column inside the inline region.
    offsets: Vec<usize>,
    inline_size: usize,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        let mut offsets = Vec::with_capacity(columns.len());
        let mut at = 0usize;
        for col in &columns {
            offsets.push(at);
            at += col.inline_size();
        }
        Self { columns, offsets, inline_size: at }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Inline byte offset of column `idx`.
    pub fn offset(&self, idx: usize) -> usize {
        self.offsets[idx]
    }

    /// Total size of the inline region; variable-width payloads start here.
    pub fn inline_size(&self) -> usize {
        self.inline_size
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Schemas are equal-for-projection when they agree columnwise on type;
    /// names may differ.
    pub fn projection_compatible(&self, other: &Schema) -> bool {
        self.len() == other.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.type_id() == b.type_id() && a.length() == b.length())
    }

    /// A new schema over the given column indices, preserving layout metadata.
    pub fn project(&self, indices: &[usize]) -> Schema {
        Schema::new(indices.iter().map(|&i| self.columns[i].clone()).collect())
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{col}")?;
        }
        write!(f, ")")
    }
}
