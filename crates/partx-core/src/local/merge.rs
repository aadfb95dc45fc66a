//! Row-level merge of two in-memory partitions.
//!
//! The output layout (column names, sources, index) comes from the same
//! [`MergeLayout`] that produced the plan's sample schema. Null keys never
//! match.

use crate::error::PlanResult;
use crate::expr::{DataType, JoinSpec, JoinType, ScalarValue};
use crate::local::frame::Frame;
use crate::schema::{ColumnSource, IndexSource, KeyRef, MergeLayout};
use std::collections::HashMap;

/// A matched or unmatched output row: positions in the left and right frames.
type RowPair = (Option<usize>, Option<usize>);

pub fn merge_frames(
    left: &Frame,
    right: &Frame,
    spec: &JoinSpec,
    layout: &MergeLayout,
) -> PlanResult<Frame> {
    let left_keys = key_rows(left, &layout.left_keys)?;
    let right_keys = key_rows(right, &layout.right_keys)?;
    let pairs = match_rows(&left_keys, &right_keys, spec.how);

    let mut rows = Vec::with_capacity(pairs.len());
    let mut index = Vec::with_capacity(pairs.len());
    for (position, (l, r)) in pairs.iter().enumerate() {
        let mut row = Vec::with_capacity(layout.columns.len());
        for (field, source) in &layout.columns {
            let value = match source {
                ColumnSource::Left(name) => pick(left, *l, name)?,
                ColumnSource::Right(name) => pick(right, *r, name)?,
                ColumnSource::Coalesced { left: ln, right: rn } => match l {
                    Some(_) => pick(left, *l, ln)?,
                    None => pick(right, *r, rn)?,
                },
                ColumnSource::Indicator => ScalarValue::from(match (l, r) {
                    (Some(_), Some(_)) => "both",
                    (Some(_), None) => "left_only",
                    _ => "right_only",
                }),
            };
            row.push(cast(value, field.dtype));
        }
        rows.push(row);
        index.push(match layout.index {
            IndexSource::Joined => match (l, r) {
                (Some(i), _) => left.index[*i].clone(),
                (None, Some(j)) => right.index[*j].clone(),
                (None, None) => ScalarValue::Null,
            },
            IndexSource::Left => l.map(|i| left.index[i].clone()).unwrap_or(ScalarValue::Null),
            IndexSource::Right => r.map(|j| right.index[j].clone()).unwrap_or(ScalarValue::Null),
            IndexSource::Positional => ScalarValue::Int64(position as i64),
        });
    }

    Frame::new(
        layout.schema.column_names(),
        layout.schema.index.name.clone(),
        index,
        rows,
    )
}

/// Canonical key of every row; `None` when any key value is null.
fn key_rows(frame: &Frame, keys: &[KeyRef]) -> PlanResult<Vec<Option<Vec<ScalarValue>>>> {
    (0..frame.num_rows())
        .map(|row| {
            let mut key = Vec::with_capacity(keys.len());
            for k in keys {
                let v = match k {
                    KeyRef::Index => frame.index[row].clone(),
                    KeyRef::Column(name) => frame.value(row, name)?,
                };
                if v.is_null() {
                    return Ok(None);
                }
                key.push(v.hash_key());
            }
            Ok(Some(key))
        })
        .collect()
}

fn build_lookup(keys: &[Option<Vec<ScalarValue>>]) -> HashMap<&[ScalarValue], Vec<usize>> {
    let mut lookup: HashMap<&[ScalarValue], Vec<usize>> = HashMap::new();
    for (i, key) in keys.iter().enumerate() {
        if let Some(k) = key {
            lookup.entry(k.as_slice()).or_default().push(i);
        }
    }
    lookup
}

fn match_rows(
    left: &[Option<Vec<ScalarValue>>],
    right: &[Option<Vec<ScalarValue>>],
    how: JoinType,
) -> Vec<RowPair> {
    let mut pairs = Vec::new();
    match how {
        JoinType::Right => {
            let lookup = build_lookup(left);
            for (j, key) in right.iter().enumerate() {
                match key.as_ref().and_then(|k| lookup.get(k.as_slice())) {
                    Some(matches) => pairs.extend(matches.iter().map(|i| (Some(*i), Some(j)))),
                    None => pairs.push((None, Some(j))),
                }
            }
        }
        _ => {
            let lookup = build_lookup(right);
            let mut right_matched = vec![false; right.len()];
            for (i, key) in left.iter().enumerate() {
                let matches = key.as_ref().and_then(|k| lookup.get(k.as_slice()));
                match (matches, how) {
                    (Some(_), JoinType::LeftSemi) => pairs.push((Some(i), None)),
                    (Some(ms), _) => {
                        for j in ms {
                            right_matched[*j] = true;
                            pairs.push((Some(i), Some(*j)));
                        }
                    }
                    (None, JoinType::Left | JoinType::Outer) => pairs.push((Some(i), None)),
                    (None, _) => {}
                }
            }
            if how == JoinType::Outer {
                pairs.extend(
                    right_matched
                        .iter()
                        .enumerate()
                        .filter(|(_, m)| !**m)
                        .map(|(j, _)| (None, Some(j))),
                );
            }
        }
    }
    pairs
}

fn pick(frame: &Frame, row: Option<usize>, column: &str) -> PlanResult<ScalarValue> {
    match row {
        Some(r) => frame.value(r, column),
        None => Ok(ScalarValue::Null),
    }
}

fn cast(value: ScalarValue, dtype: DataType) -> ScalarValue {
    match (value, dtype) {
        (ScalarValue::Int64(v), DataType::Float64) => ScalarValue::from(v as f64),
        (v, _) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DataType;
    use crate::schema::{Field, IndexField, Schema};

    fn schema(cols: &[&str]) -> Schema {
        Schema::new(
            cols.iter().map(|c| Field::new(*c, DataType::Int64)).collect(),
            IndexField::unnamed(DataType::Int64),
        )
    }

    fn frames() -> (Frame, Frame) {
        let left = Frame::from_rows(
            &["k", "v"],
            vec![
                vec![1i64.into(), 10i64.into()],
                vec![2i64.into(), 20i64.into()],
                vec![ScalarValue::Null, 30i64.into()],
            ],
        )
        .unwrap();
        let right = Frame::from_rows(
            &["k", "v"],
            vec![
                vec![1i64.into(), 100i64.into()],
                vec![1i64.into(), 101i64.into()],
                vec![3i64.into(), 300i64.into()],
            ],
        )
        .unwrap();
        (left, right)
    }

    fn run(how: JoinType, indicator: bool) -> Frame {
        let (left, right) = frames();
        let spec = JoinSpec::on(how, &["k"]).with_indicator(indicator);
        let layout =
            MergeLayout::derive(&schema(&["k", "v"]), &schema(&["k", "v"]), &spec).unwrap();
        merge_frames(&left, &right, &spec, &layout).unwrap()
    }

    #[test]
    fn test_inner_matches_every_pair() {
        let out = run(JoinType::Inner, false);
        assert_eq!(out.columns, vec!["k", "v_x", "v_y"]);
        assert_eq!(out.num_rows(), 2);
        assert_eq!(
            out.column("v_y").unwrap(),
            vec![ScalarValue::from(100i64), ScalarValue::from(101i64)]
        );
    }

    #[test]
    fn test_left_keeps_unmatched_and_null_keys() {
        let out = run(JoinType::Left, false);
        assert_eq!(out.num_rows(), 4);
        assert_eq!(out.column("v_y").unwrap()[2], ScalarValue::Null);
    }

    #[test]
    fn test_outer_coalesces_key_and_flags_origin() {
        let out = run(JoinType::Outer, true);
        assert_eq!(out.num_rows(), 5);
        let last = out.rows.last().unwrap();
        assert_eq!(last[0], ScalarValue::from(3i64));
        assert_eq!(last[3], ScalarValue::from("right_only"));
    }

    #[test]
    fn test_right_and_semi() {
        assert_eq!(run(JoinType::Right, false).num_rows(), 3);
        let semi = run(JoinType::LeftSemi, false);
        assert_eq!(semi.columns, vec!["k", "v"]);
        assert_eq!(semi.column("v").unwrap(), vec![ScalarValue::from(10i64)]);
    }
}
