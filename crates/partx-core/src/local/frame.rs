//! In-memory partitions and the single-table primitives the join layer calls.

use crate::error::{PlanError, PlanResult};
use crate::expr::{ScalarValue, ShuffleKey, INDEX_PLACEHOLDER};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// One materialized partition: row-major values plus an index.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub index_name: Option<String>,
    pub index: Vec<ScalarValue>,
    pub rows: Vec<Vec<ScalarValue>>,
}

impl Frame {
    pub fn new(
        columns: Vec<String>,
        index_name: Option<String>,
        index: Vec<ScalarValue>,
        rows: Vec<Vec<ScalarValue>>,
    ) -> PlanResult<Self> {
        if index.len() != rows.len() {
            return Err(PlanError::Execution(format!(
                "index has {} values for {} rows",
                index.len(),
                rows.len()
            )));
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(PlanError::Execution(format!(
                "row has {} values for {} columns",
                bad.len(),
                columns.len()
            )));
        }
        Ok(Self {
            columns,
            index_name,
            index,
            rows,
        })
    }

    /// A frame with a positional `0..n` index.
    pub fn from_rows(columns: &[&str], rows: Vec<Vec<ScalarValue>>) -> PlanResult<Self> {
        let index = (0..rows.len() as i64).map(ScalarValue::Int64).collect();
        Self::new(
            columns.iter().map(|c| c.to_string()).collect(),
            None,
            index,
            rows,
        )
    }

    /// An empty frame with the same columns and index name.
    pub fn empty_like(&self) -> Frame {
        Frame {
            columns: self.columns.clone(),
            index_name: self.index_name.clone(),
            index: vec![],
            rows: vec![],
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of a column, in row order.
    pub fn column(&self, name: &str) -> PlanResult<Vec<ScalarValue>> {
        let pos = self
            .column_position(name)
            .ok_or_else(|| PlanError::UnknownColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|r| r[pos].clone()).collect())
    }

    /// Value of a column in row `row`, falling back to the index when `name`
    /// is the index name (or the unnamed-index placeholder).
    pub fn value(&self, row: usize, name: &str) -> PlanResult<ScalarValue> {
        if let Some(pos) = self.column_position(name) {
            return Ok(self.rows[row][pos].clone());
        }
        let is_index = self.index_name.as_deref() == Some(name)
            || (self.index_name.is_none() && name == INDEX_PLACEHOLDER);
        if is_index {
            return Ok(self.index[row].clone());
        }
        Err(PlanError::UnknownColumn(name.to_string()))
    }

    /// Key values of row `row` under a shuffle key.
    pub fn key_values(&self, row: usize, on: &ShuffleKey) -> PlanResult<Vec<ScalarValue>> {
        match on {
            ShuffleKey::Index(_) => Ok(vec![self.index[row].clone()]),
            ShuffleKey::Columns(names) => names.iter().map(|n| self.value(row, n)).collect(),
        }
    }

    pub fn project(&self, columns: &[String]) -> PlanResult<Frame> {
        let positions = columns
            .iter()
            .map(|c| {
                self.column_position(c)
                    .ok_or_else(|| PlanError::UnknownColumn(c.clone()))
            })
            .collect::<PlanResult<Vec<_>>>()?;
        let rows = self
            .rows
            .iter()
            .map(|r| positions.iter().map(|p| r[*p].clone()).collect())
            .collect();
        Ok(Frame {
            columns: columns.to_vec(),
            index_name: self.index_name.clone(),
            index: self.index.clone(),
            rows,
        })
    }

    /// Only the index.
    pub fn index_frame(&self) -> Frame {
        Frame {
            columns: vec![],
            index_name: self.index_name.clone(),
            index: self.index.clone(),
            rows: vec![vec![]; self.index.len()],
        }
    }

    /// Rows at the given positions, in the given order.
    pub fn take(&self, positions: &[usize]) -> Frame {
        Frame {
            columns: self.columns.clone(),
            index_name: self.index_name.clone(),
            index: positions.iter().map(|p| self.index[*p].clone()).collect(),
            rows: positions.iter().map(|p| self.rows[*p].clone()).collect(),
        }
    }

    /// Keep rows whose mask value is `true`. The mask's first column is used.
    pub fn filter(&self, mask: &Frame) -> PlanResult<Frame> {
        if mask.num_rows() != self.num_rows() {
            return Err(PlanError::Execution(format!(
                "mask has {} rows, frame has {}",
                mask.num_rows(),
                self.num_rows()
            )));
        }
        if mask.columns.is_empty() {
            return Err(PlanError::Execution("mask has no columns".to_string()));
        }
        let keep: Vec<usize> = mask
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r[0] == ScalarValue::Bool(true))
            .map(|(i, _)| i)
            .collect();
        Ok(self.take(&keep))
    }

    /// First row per key.
    pub fn drop_duplicates(&self, on: &ShuffleKey) -> PlanResult<Frame> {
        let mut seen = HashSet::new();
        let mut keep = Vec::new();
        for row in 0..self.num_rows() {
            let key: Vec<ScalarValue> = self
                .key_values(row, on)?
                .iter()
                .map(|v| v.hash_key())
                .collect();
            if seen.insert(key) {
                keep.push(row);
            }
        }
        Ok(self.take(&keep))
    }

    /// Split rows into `buckets` frames by key hash.
    pub fn hash_split(&self, on: &ShuffleKey, buckets: usize) -> PlanResult<Vec<Frame>> {
        let mut positions: Vec<Vec<usize>> = vec![Vec::new(); buckets.max(1)];
        for row in 0..self.num_rows() {
            let bucket = partition_index(&self.key_values(row, on)?, buckets);
            positions[bucket].push(row);
        }
        Ok(positions.iter().map(|p| self.take(p)).collect())
    }

    /// Rows whose index lies in `[lower, upper)`, or `[lower, upper]` if `closed`.
    pub fn slice_index(&self, lower: &ScalarValue, upper: &ScalarValue, closed: bool) -> Frame {
        use std::cmp::Ordering;
        let keep: Vec<usize> = (0..self.num_rows())
            .filter(|&i| {
                let v = &self.index[i];
                let above = matches!(v.compare(lower), Some(Ordering::Greater | Ordering::Equal));
                let below = match v.compare(upper) {
                    Some(Ordering::Less) => true,
                    Some(Ordering::Equal) => closed,
                    _ => false,
                };
                above && below
            })
            .collect();
        self.take(&keep)
    }

    /// Piece `piece` of `pieces` contiguous row-position slices.
    pub fn split_rows(&self, pieces: usize, piece: usize) -> Frame {
        let n = self.num_rows();
        let pieces = pieces.max(1);
        let start = piece * n / pieces;
        let end = (piece + 1) * n / pieces;
        let positions: Vec<usize> = (start..end.min(n)).collect();
        self.take(&positions)
    }

    /// Concatenate frames that share a layout. The first frame's layout wins.
    pub fn concat(frames: &[Frame]) -> PlanResult<Frame> {
        let first = frames
            .first()
            .ok_or_else(|| PlanError::Execution("concat of no frames".to_string()))?;
        let mut out = first.empty_like();
        for f in frames {
            if f.columns != out.columns {
                return Err(PlanError::Execution(format!(
                    "concat of mismatched columns {:?} and {:?}",
                    out.columns, f.columns
                )));
            }
            out.index.extend(f.index.iter().cloned());
            out.rows.extend(f.rows.iter().cloned());
        }
        Ok(out)
    }
}

/// Bucket of a key under hash partitioning into `n` buckets.
///
/// Integer keys hash like the equal float, so both sides of a join agree on the
/// bucket of `1` and `1.0`.
pub fn partition_index(key: &[ScalarValue], n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    for v in key {
        v.hash_key().hash(&mut hasher);
    }
    (hasher.finish() % n as u64) as usize
}
