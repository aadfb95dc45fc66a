//! # Sample Schemas and the Merge Schema Rule
//!
//! Every plan node has a zero-row sample schema: an ordered list of typed columns
//! plus a typed (optionally named) index. The schema of a join is never stored; it
//! is derived from both inputs' schemas by [`MergeLayout::derive`].
//!
//! ## Merge Rule
//!
//! 1. Key pairs are resolved on both sides. A side joined on its index, or through
//!    a key naming its index, contributes the index. Paired key dtypes must be
//!    equal or both numeric, otherwise planning fails with `SchemaMismatch`.
//! 2. A key pair with the same name on both sides that is a real column on both
//!    sides is coalesced into a single output column (dtype promoted to `float64`
//!    on an `int64`/`float64` mix).
//! 3. Left columns follow in order, then right columns. Any other name present on
//!    both sides takes `suffixes.0` on the left and `suffixes.1` on the right.
//! 4. `leftsemi` yields the left columns only.
//! 5. `indicator` appends a `_merge` category column.
//! 6. The output index is the joined index when both sides join on their index,
//!    the left index when only the right does, the right index when only the left
//!    does, and a fresh positional index otherwise.
//!
//! The in-memory merge primitive consumes the same [`MergeLayout`], so the sample
//! schema and the rows it produces cannot disagree.

use crate::error::{PlanError, PlanResult};
use crate::expr::{DataType, JoinSide, JoinSpec, JoinType, INDEX_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Name of the column added by `indicator`.
pub const INDICATOR_COLUMN: &str = "_merge";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub dtype: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexField {
    pub name: Option<String>,
    pub dtype: DataType,
}

impl IndexField {
    pub fn named(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: Some(name.into()),
            dtype,
        }
    }

    pub fn unnamed(dtype: DataType) -> Self {
        Self { name: None, dtype }
    }

    /// The name used when shuffling by this index.
    pub fn shuffle_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| INDEX_PLACEHOLDER.to_string())
    }
}

/// Zero-row sample schema of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Field>,
    pub index: IndexField,
}

impl Schema {
    pub fn new(columns: Vec<Field>, index: IndexField) -> Self {
        Self { columns, index }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|f| f.name.clone()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.columns.iter().find(|f| f.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// True when `keys` is a single name that refers to the index rather than a
    /// column.
    pub fn contains_index_name(&self, keys: &[String]) -> bool {
        match keys {
            [key] => self.index.name.as_deref() == Some(key.as_str()) && !self.has_column(key),
            _ => false,
        }
    }

    /// Resolve a key name to a column, or to the index when the name is the
    /// index name and not a column.
    pub fn resolve_key(&self, name: &str) -> PlanResult<KeyRef> {
        if self.has_column(name) {
            Ok(KeyRef::Column(name.to_string()))
        } else if self.index.name.as_deref() == Some(name) {
            Ok(KeyRef::Index)
        } else {
            Err(PlanError::UnknownColumn(name.to_string()))
        }
    }

    pub fn key_dtype(&self, key: &KeyRef) -> PlanResult<DataType> {
        match key {
            KeyRef::Index => Ok(self.index.dtype),
            KeyRef::Column(name) => self
                .field(name)
                .map(|f| f.dtype)
                .ok_or_else(|| PlanError::UnknownColumn(name.clone())),
        }
    }

    /// Schema restricted to `columns`, in the requested order.
    pub fn project(&self, columns: &[String]) -> PlanResult<Schema> {
        let mut fields = Vec::with_capacity(columns.len());
        for name in columns {
            let field = self
                .field(name)
                .ok_or_else(|| PlanError::UnknownColumn(name.clone()))?;
            fields.push(field.clone());
        }
        Ok(Schema::new(fields, self.index.clone()))
    }

    /// Schema of a frame holding only this frame's index.
    pub fn index_only(&self) -> Schema {
        Schema::new(vec![], self.index.clone())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{}: {}", c.name, c.dtype))
            .collect();
        let index = self.index.name.as_deref().unwrap_or("<unnamed>");
        write!(f, "[{}] index={}: {}", cols.join(", "), index, self.index.dtype)
    }
}

/// A join key resolved against a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyRef {
    Column(String),
    Index,
}

/// Where an output column's values come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnSource {
    Left(String),
    Right(String),
    /// A shared key column: the left value when the row has one, else the right.
    Coalesced { left: String, right: String },
    Indicator,
}

/// Where the output index comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexSource {
    /// Both sides joined on their index: the matched index value.
    Joined,
    Left,
    Right,
    /// A fresh `0..n` index per partition.
    Positional,
}

/// Output layout of a two-table merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeLayout {
    pub left_keys: Vec<KeyRef>,
    pub right_keys: Vec<KeyRef>,
    pub columns: Vec<(Field, ColumnSource)>,
    pub index: IndexSource,
    pub schema: Schema,
}

impl MergeLayout {
    /// Apply the merge rule to two sample schemas.
    pub fn derive(left: &Schema, right: &Schema, spec: &JoinSpec) -> PlanResult<MergeLayout> {
        let left_keys = side_keys(left, spec, JoinSide::Left)?;
        let right_keys = side_keys(right, spec, JoinSide::Right)?;
        if left_keys.is_empty() || left_keys.len() != right_keys.len() {
            return Err(PlanError::InvalidPlan(format!(
                "join needs the same non-zero number of keys on both sides, got {} and {}",
                left_keys.len(),
                right_keys.len()
            )));
        }

        let mut coalesced: HashSet<String> = HashSet::new();
        let mut promoted: HashSet<String> = HashSet::new();
        for (lk, rk) in left_keys.iter().zip(right_keys.iter()) {
            let ldt = left.key_dtype(lk)?;
            let rdt = right.key_dtype(rk)?;
            if !compatible(ldt, rdt) {
                return Err(PlanError::SchemaMismatch {
                    column: key_label(left, lk),
                    left: ldt.to_string(),
                    right: rdt.to_string(),
                });
            }
            if let (KeyRef::Column(l), KeyRef::Column(r)) = (lk, rk) {
                if l == r {
                    coalesced.insert(l.clone());
                    if ldt != rdt {
                        promoted.insert(l.clone());
                    }
                }
            }
        }

        let left_index_join = left_keys.iter().any(|k| *k == KeyRef::Index);
        let right_index_join = right_keys.iter().any(|k| *k == KeyRef::Index);
        let (index, index_field) = match (left_index_join, right_index_join) {
            (true, true) => (IndexSource::Joined, left.index.clone()),
            (false, true) => (IndexSource::Left, left.index.clone()),
            (true, false) => (IndexSource::Right, right.index.clone()),
            (false, false) => (IndexSource::Positional, IndexField::unnamed(DataType::Int64)),
        };

        let mut columns: Vec<(Field, ColumnSource)> = Vec::new();
        if spec.how == JoinType::LeftSemi {
            for f in &left.columns {
                columns.push((f.clone(), ColumnSource::Left(f.name.clone())));
            }
        } else {
            let (lsuffix, rsuffix) = (&spec.suffixes.0, &spec.suffixes.1);
            for f in &left.columns {
                if coalesced.contains(&f.name) {
                    let dtype = if promoted.contains(&f.name) {
                        DataType::Float64
                    } else {
                        f.dtype
                    };
                    columns.push((
                        Field::new(f.name.clone(), dtype),
                        ColumnSource::Coalesced {
                            left: f.name.clone(),
                            right: f.name.clone(),
                        },
                    ));
                } else if right.has_column(&f.name) {
                    columns.push((
                        Field::new(format!("{}{}", f.name, lsuffix), f.dtype),
                        ColumnSource::Left(f.name.clone()),
                    ));
                } else {
                    columns.push((f.clone(), ColumnSource::Left(f.name.clone())));
                }
            }
            for f in &right.columns {
                if coalesced.contains(&f.name) {
                    continue;
                }
                let name = if left.has_column(&f.name) {
                    format!("{}{}", f.name, rsuffix)
                } else {
                    f.name.clone()
                };
                columns.push((Field::new(name, f.dtype), ColumnSource::Right(f.name.clone())));
            }
        }
        if spec.indicator {
            columns.push((
                Field::new(INDICATOR_COLUMN, DataType::Category),
                ColumnSource::Indicator,
            ));
        }

        let mut seen = HashSet::new();
        for (field, _) in &columns {
            if !seen.insert(field.name.as_str()) {
                return Err(PlanError::InvalidPlan(format!(
                    "merge produces duplicate column '{}'",
                    field.name
                )));
            }
        }

        let schema = Schema::new(
            columns.iter().map(|(f, _)| f.clone()).collect(),
            index_field,
        );
        Ok(MergeLayout {
            left_keys,
            right_keys,
            columns,
            index,
            schema,
        })
    }
}

fn side_keys(schema: &Schema, spec: &JoinSpec, side: JoinSide) -> PlanResult<Vec<KeyRef>> {
    if spec.index_flag(side) {
        return Ok(vec![KeyRef::Index]);
    }
    spec.keys(side)
        .iter()
        .map(|k| schema.resolve_key(k))
        .collect()
}

fn compatible(a: DataType, b: DataType) -> bool {
    a == b || (a.is_numeric() && b.is_numeric())
}

fn key_label(schema: &Schema, key: &KeyRef) -> String {
    match key {
        KeyRef::Column(name) => name.clone(),
        KeyRef::Index => schema.index.shuffle_name(),
    }
}
