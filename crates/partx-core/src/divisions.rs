//! # Partition Boundaries
//!
//! A table with `n` partitions carries `n + 1` boundary values ("divisions").
//! Partition `i` holds every row whose index lies in `[d[i], d[i + 1])`; the last
//! partition is closed on both ends. A table whose producer cannot vouch for a
//! global ordering reports `n + 1` null sentinels instead, and everything that
//! needs sortedness must treat it as an unordered set of partitions.
//!
//! Known boundaries are non-decreasing. That the rows actually honour them is a
//! contract of whoever produced the table; nothing here verifies it.

use crate::error::{PlanError, PlanResult};
use crate::expr::ScalarValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;

/// Boundary sequence of a partitioned table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Divisions(Vec<ScalarValue>);

impl Divisions {
    /// Known boundaries. Fails when the sequence is empty, decreasing, or mixes
    /// nulls with values.
    pub fn new(values: Vec<ScalarValue>) -> PlanResult<Self> {
        if values.is_empty() {
            return Err(PlanError::InvalidPlan(
                "divisions need at least one boundary".to_string(),
            ));
        }
        let nulls = values.iter().filter(|v| v.is_null()).count();
        if nulls > 0 && nulls < values.len() {
            return Err(PlanError::InvalidPlan(
                "divisions mix known and unknown boundaries".to_string(),
            ));
        }
        if nulls == 0 {
            for pair in values.windows(2) {
                if boundary_order(&pair[0], &pair[1]) == Ordering::Greater {
                    return Err(PlanError::InvalidPlan(format!(
                        "divisions are not sorted: {} > {}",
                        pair[0], pair[1]
                    )));
                }
            }
        }
        Ok(Self(values))
    }

    /// Unknown boundaries for `npartitions` partitions.
    pub fn unknown(npartitions: usize) -> Self {
        Self(vec![ScalarValue::Null; npartitions + 1])
    }

    pub fn values(&self) -> &[ScalarValue] {
        &self.0
    }

    pub fn is_known(&self) -> bool {
        !self.0.iter().any(|v| v.is_null())
    }

    pub fn npartitions(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    pub fn first(&self) -> Option<&ScalarValue> {
        self.0.first().filter(|v| !v.is_null())
    }

    pub fn last(&self) -> Option<&ScalarValue> {
        self.0.last().filter(|v| !v.is_null())
    }

    /// Common boundaries of two known sequences: their sorted, duplicate-free
    /// union. A union with a single distinct value collapses to `(b, b)`.
    pub fn merge(a: &Divisions, b: &Divisions) -> Divisions {
        let mut merged = merge_boundaries(&a.0, &b.0);
        if merged.len() == 1 {
            let only = merged[0].clone();
            merged.push(only);
        }
        Divisions(merged)
    }
}

/// Sorted, duplicate-free union of two sorted boundary sequences. Linear in the
/// combined length.
pub fn merge_boundaries(a: &[ScalarValue], b: &[ScalarValue]) -> Vec<ScalarValue> {
    let mut out: Vec<ScalarValue> = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        let next = match (a.get(i), b.get(j)) {
            (Some(x), Some(y)) => {
                if boundary_order(x, y) != Ordering::Greater {
                    i += 1;
                    x
                } else {
                    j += 1;
                    y
                }
            }
            (Some(x), None) => {
                i += 1;
                x
            }
            (None, Some(y)) => {
                j += 1;
                y
            }
            (None, None) => break,
        };
        let duplicate = out
            .last()
            .map_or(false, |last| boundary_order(last, next) == Ordering::Equal);
        if !duplicate {
            out.push(next.clone());
        }
    }
    out
}

/// Order of two boundary values. Integers and floats compare numerically, so
/// `5` and `5.0` are the same boundary; values without a numeric or same-type
/// comparison fall back to the structural order.
pub fn boundary_order(a: &ScalarValue, b: &ScalarValue) -> Ordering {
    a.compare(b).unwrap_or_else(|| a.cmp(b))
}

/// Contiguous groups of input partitions concatenated into each of `n_out`
/// outputs, for `n_out <= n_in`.
pub fn contiguous_groups(n_in: usize, n_out: usize) -> Vec<Range<usize>> {
    (0..n_out)
        .map(|j| (j * n_in / n_out)..((j + 1) * n_in / n_out))
        .collect()
}

/// Number of pieces each input partition is split into to reach `n_out`
/// outputs, for `n_out >= n_in`. Earlier partitions take the remainder.
pub fn split_counts(n_in: usize, n_out: usize) -> Vec<usize> {
    let base = n_out / n_in.max(1);
    let extra = n_out % n_in.max(1);
    (0..n_in).map(|i| base + usize::from(i < extra)).collect()
}

impl fmt::Display for Divisions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_known() {
            return write!(f, "unknown({})", self.npartitions());
        }
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Divisions {
        Divisions::new(values.iter().map(|v| ScalarValue::from(*v)).collect()).unwrap()
    }

    #[test]
    fn test_merge_interleaves_boundaries() {
        let merged = Divisions::merge(&ints(&[0, 10, 20, 30]), &ints(&[0, 15, 30]));
        assert_eq!(merged, ints(&[0, 10, 15, 20, 30]));
        assert_eq!(merged.npartitions(), 4);
    }

    #[test]
    fn test_merge_with_itself_deduplicates() {
        let a = ints(&[0, 5, 5, 9]);
        assert_eq!(Divisions::merge(&a, &a), ints(&[0, 5, 9]));
    }

    #[test]
    fn test_merge_single_boundary_collapses() {
        let merged = Divisions::merge(&ints(&[3, 3]), &ints(&[3, 3]));
        assert_eq!(merged, ints(&[3, 3]));
        assert_eq!(merged.npartitions(), 1);
    }

    #[test]
    fn test_merge_output_is_sorted_and_unique() {
        let vals = |v: &[i64]| v.iter().map(|x| ScalarValue::from(*x)).collect::<Vec<_>>();
        let merged = merge_boundaries(&vals(&[1, 4, 7, 7]), &vals(&[0, 4, 8]));
        let expected = vals(&[0, 1, 4, 7, 8]);
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_unknown_divisions() {
        let d = Divisions::unknown(3);
        assert!(!d.is_known());
        assert_eq!(d.npartitions(), 3);
        assert_eq!(d.to_string(), "unknown(3)");
    }

    #[test]
    fn test_rejects_unsorted_and_mixed() {
        let unsorted = Divisions::new(vec![ScalarValue::from(5i64), ScalarValue::from(1i64)]);
        assert!(matches!(unsorted, Err(PlanError::InvalidPlan(_))));
        let mixed = Divisions::new(vec![ScalarValue::Null, ScalarValue::from(1i64)]);
        assert!(matches!(mixed, Err(PlanError::InvalidPlan(_))));
    }

    #[test]
    fn test_repartition_groups() {
        assert_eq!(contiguous_groups(5, 2), vec![0..2, 2..5]);
        assert_eq!(contiguous_groups(4, 4), vec![0..1, 1..2, 2..3, 3..4]);
        assert_eq!(split_counts(2, 5), vec![3, 2]);
        assert_eq!(split_counts(3, 3).iter().sum::<usize>(), 3);
    }

    #[test]
    fn test_mixed_numeric_boundaries() {
        let float = |v: f64| ScalarValue::from(v);
        let d = Divisions::new(vec![float(0.5), ScalarValue::from(10i64)]).unwrap();
        assert_eq!(d.npartitions(), 1);

        let ints = [0i64, 10, 20].map(ScalarValue::from).to_vec();
        let floats = vec![float(5.0), float(10.0), float(15.0)];
        let merged = merge_boundaries(&ints, &floats);
        assert_eq!(
            merged,
            vec![
                ScalarValue::from(0i64),
                float(5.0),
                ScalarValue::from(10i64),
                float(15.0),
                ScalarValue::from(20i64),
            ]
        );
        let common = Divisions::merge(
            &Divisions::new(ints).unwrap(),
            &Divisions::new(floats).unwrap(),
        );
        assert_eq!(common.npartitions(), 4);
    }
}
